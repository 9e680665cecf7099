use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use super::{ContextGraph, ContextKind};
use crate::cache::NavigationCache;
use crate::changeset::Changeset;
use crate::entity::{Entity, ValueSide};
use crate::error::StorageError;
use crate::incremental::IncrementalContext;
use crate::input::MutationInput;
use crate::member::affected_by_member;
use crate::model::{MemberId, ObservedMember};

impl ContextGraph {
    /// Root entities whose value may have changed in the batch described by `changeset`.
    ///
    /// Every context collects the entities affected by the members observed on it, plus those of its
    /// children: navigation children are mapped back to their owners through the inverse navigation
    /// (on both sides of the batch), every other kind passes its entities through. Each owner/related
    /// pair found this way is recorded in `incremental`.
    pub async fn affected_entities(
        &self,
        changeset: &Changeset,
        input: &dyn MutationInput,
        incremental: &IncrementalContext,
        cache: &NavigationCache,
    ) -> Result<BTreeSet<Entity>, StorageError> {
        let model = input.model();
        let by_member: HashMap<ObservedMember, HashSet<Entity>> =
            self.observed_members().into_iter().map(|m| (m, affected_by_member(m, changeset, model, incremental))).collect();

        let mut affected: Vec<HashSet<Entity>> = vec![HashSet::new(); self.nodes.len()];
        for node in self.nodes.iter().rev() {
            let mut entities: HashSet<Entity> = node.observed.iter().filter_map(|m| by_member.get(m)).flatten().copied().collect();
            for child in &node.children {
                let child_entities = &affected[child.0];
                if child_entities.is_empty() {
                    continue;
                }
                match self.nodes[child.0].kind {
                    ContextKind::Navigation { navigation } => {
                        let owners = map_to_owners(child_entities, navigation, input, incremental, cache).await?;
                        entities.extend(owners);
                    }
                    ContextKind::Empty => {}
                    _ => entities.extend(child_entities.iter().copied()),
                }
            }
            affected[node.id.0] = entities;
        }

        let root_type = self.root_type();
        let mut roots: BTreeSet<Entity> = affected[self.root().0].iter().copied().filter(|e| e.ty == root_type).collect();
        for (entity, _) in changeset.structural() {
            if entity.ty == root_type {
                incremental.mark_load_all(entity);
                roots.insert(entity);
            }
        }
        debug!("{} affected root entities, {} recorded navigations", roots.len(), incremental.len());
        Ok(roots)
    }
}

async fn map_to_owners(
    entities: &HashSet<Entity>,
    navigation: MemberId,
    input: &dyn MutationInput,
    incremental: &IncrementalContext,
    cache: &NavigationCache,
) -> Result<HashSet<Entity>, StorageError> {
    let mut owners = HashSet::new();
    let Some(inverse) = input.model().inverse(navigation) else {
        return Ok(owners);
    };
    for side in ValueSide::BOTH {
        let mut valid: Vec<Entity> = entities.iter().copied().filter(|e| input.state(*e).exists_on(side)).collect();
        if valid.is_empty() {
            continue;
        }
        valid.sort();
        for (related, parents) in cache.load(input, &valid, inverse, side).await? {
            for owner in parents {
                incremental.record(owner, navigation, related);
                owners.insert(owner);
            }
        }
    }
    Ok(owners)
}
