use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::{ComputedMember, ConsistencyReport, UpdateMemory};
use crate::action_info;
use crate::changeset::Changeset;
use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::error::{ConfigurationError, EvaluationError, UpdateError};
use crate::input::{MutableInput, MutationInput};
use crate::model::MemberId;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

/// Every computed member of a model, in dependency order
pub struct ComputedGraph {
    members: Vec<Box<dyn ComputedMember>>,
    max_rounds: usize,
}

impl ComputedGraph {
    /// Validates that no member depends on itself, directly or through other computed members, and
    /// orders members so that dependencies are updated before their dependents.
    pub fn new(members: Vec<Box<dyn ComputedMember>>, config: &EngineConfig) -> Result<Self, ConfigurationError> {
        let mut index = HashMap::new();
        for (i, member) in members.iter().enumerate() {
            if index.insert(member.member(), i).is_some() {
                return Err(ConfigurationError::Unsupported(format!("{} is computed more than once", member.name())));
            }
        }
        let edges: Vec<Vec<usize>> = members
            .iter()
            .map(|member| member.dependencies().iter().filter_map(|dependency| index.get(dependency).copied()).collect())
            .collect();

        let mut visits = vec![Visit::New; members.len()];
        let mut order = Vec::with_capacity(members.len());
        let mut path = Vec::new();
        for start in 0..members.len() {
            visit(start, &edges, &mut visits, &mut path, &mut order).map_err(|cycle| {
                ConfigurationError::CyclicDependency(cycle.iter().map(|i| members[*i].name()).collect::<Vec<_>>().join(" -> "))
            })?;
        }

        let mut slots: Vec<Option<Box<dyn ComputedMember>>> = members.into_iter().map(Some).collect();
        let members: Vec<Box<dyn ComputedMember>> = order.into_iter().filter_map(|i| slots[i].take()).collect();
        debug!("computed members in update order: {}", members.iter().map(|m| m.name()).collect::<Vec<_>>().join(", "));
        Ok(Self { members, max_rounds: config.max_update_rounds })
    }

    pub fn members(&self) -> &[Box<dyn ComputedMember>] { &self.members }

    /// Qualified names in update order
    pub fn order(&self) -> Vec<&str> { self.members.iter().map(|m| m.name()).collect() }

    pub fn get(&self, member: MemberId) -> Option<&dyn ComputedMember> {
        self.members.iter().find(|m| m.member() == member).map(|m| m.as_ref())
    }

    /// Bring every computed member up to date with the batch. Returns everything written.
    ///
    /// Members run in dependency order; rounds repeat until one writes nothing, so that a member
    /// observing the output of a later one (through a navigation) still settles.
    pub async fn update(&self, input: &dyn MutableInput) -> Result<Changeset, UpdateError> {
        let mut memories: Vec<UpdateMemory> = self.members.iter().map(|m| m.new_memory()).collect();
        let total = Changeset::new();
        for round in 1..=self.max_rounds {
            let written = Changeset::new();
            for (member, memory) in self.members.iter().zip(memories.iter_mut()) {
                let changes = member.update(input, Some(memory)).await?;
                if !changes.is_empty() {
                    debug!("round {}: {} wrote {} values", round, member.name(), changes.len());
                }
                changes.merge_into(&written, false)?;
            }
            if written.is_empty() {
                action_info!("ComputedGraph", "update", "settled after {} rounds, {} values written", round, total.len());
                return Ok(total);
            }
            written.merge_into(&total, true)?;
        }
        Err(UpdateError::RoundLimit(self.max_rounds))
    }

    /// Check every member against `entities`, keyed by member name. Entities of other types are
    /// skipped by each member.
    pub async fn check_consistency(&self, input: &dyn MutationInput, entities: &[Entity]) -> Result<Vec<(String, ConsistencyReport)>, EvaluationError> {
        let mut reports = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let declaring = input.model().member(member.member()).declaring_type;
            let own: Vec<Entity> = entities.iter().copied().filter(|e| e.ty == declaring).collect();
            reports.push((member.name().to_string(), member.check_consistency(input, &own).await?));
        }
        Ok(reports)
    }
}

/// Depth first, pushing members after their dependencies. Returns the cycle as a path of indexes.
fn visit(node: usize, edges: &[Vec<usize>], visits: &mut [Visit], path: &mut Vec<usize>, order: &mut Vec<usize>) -> Result<(), Vec<usize>> {
    match visits[node] {
        Visit::Done => return Ok(()),
        Visit::Active => {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Err(cycle);
        }
        Visit::New => {}
    }
    visits[node] = Visit::Active;
    path.push(node);
    let dependencies: BTreeSet<usize> = edges[node].iter().copied().collect();
    for dependency in dependencies {
        visit(dependency, edges, visits, path, order)?;
    }
    path.pop();
    visits[node] = Visit::Done;
    order.push(node);
    Ok(())
}
