//! Expression analysis.
//!
//! Compiling an expression walks it once: member names are resolved against the model, lambda
//! parameters become environment slots, and every member read is registered on the entity context
//! it is made from. The result bundles the context graph (used to find affected entities) with the
//! IR the evaluator interprets.

mod analyzer;
mod node;

pub use node::Node;

use std::collections::BTreeSet;

use rollup_expr::Expr;
use tracing::debug;

use crate::context::{ContextGraph, ContextId, ContextKind};
use crate::error::ConfigurationError;
use crate::model::{EntityTypeId, MemberId, Model, ObservedMember};
use analyzer::Analyzer;

#[derive(Debug)]
pub struct CompiledExpression {
    pub entity_type: EntityTypeId,
    pub expression: Expr,
    pub filter: Option<Expr>,
    pub graph: ContextGraph,
    /// The expression lambda
    pub value: Node,
    /// The filter lambda, if any
    pub filter_node: Option<Node>,
    /// Incrementally loaded collection navigations the value is only a partial result over
    pub partial: BTreeSet<ContextId>,
    pub observed: Vec<ObservedMember>,
    /// Size of the evaluation environment
    pub slots: usize,
}

impl CompiledExpression {
    /// Compile `expression` (and the optional `filter`), both one-parameter lambdas over `entity_type`
    pub fn compile(model: &Model, entity_type: EntityTypeId, expression: &Expr, filter: Option<&Expr>) -> Result<Self, ConfigurationError> {
        Self::compile_with(model, entity_type, expression, filter, true)
    }

    /// Compile an expression that is only ever evaluated in full on the current state, such as a
    /// consistency predicate. Change tracking is not validated.
    pub fn compile_unchecked(model: &Model, entity_type: EntityTypeId, expression: &Expr, filter: Option<&Expr>) -> Result<Self, ConfigurationError> {
        Self::compile_with(model, entity_type, expression, filter, false)
    }

    fn compile_with(model: &Model, entity_type: EntityTypeId, expression: &Expr, filter: Option<&Expr>, checked: bool) -> Result<Self, ConfigurationError> {
        let mut analyzer = Analyzer::new(model, entity_type);
        let value = analyzer.root_lambda(expression)?;
        let filter_node = match filter {
            Some(filter) => {
                analyzer.marking = false;
                Some(analyzer.root_lambda(filter)?.node)
            }
            None => None,
        };

        let mut graph = analyzer.graph;
        let slots = analyzer.slots;
        if checked {
            graph.finalize(model)?;
        } else {
            graph.resolve_loading(model);
        }
        let partial: BTreeSet<ContextId> = value.flow.partial.into_iter().filter(|c| !graph.node(*c).is_eager()).collect();
        let observed: Vec<ObservedMember> = graph.observed_members().into_iter().collect();

        debug!(
            "compiled {} for {}: {} contexts, {} observed members, partial over {:?}\n{}",
            expression,
            model.entity_type_by_id(entity_type).name,
            graph.len(),
            observed.len(),
            partial,
            graph.describe(model)
        );
        Ok(Self { entity_type, expression: expression.clone(), filter: filter.cloned(), graph, value: value.node, filter_node, partial, observed, slots })
    }

    /// Whether incremental evaluation yields a partial value rather than the exact one
    pub fn is_partial(&self) -> bool { !self.partial.is_empty() }

    /// Ids of every observed member
    pub fn dependencies(&self) -> BTreeSet<MemberId> { self.observed.iter().map(|m| m.id()).collect() }

    /// Navigations read directly from the root entity, the candidates for bulk prefetching
    pub fn root_navigations(&self) -> Vec<MemberId> {
        let nodes = self.graph.nodes();
        let mut at_root = vec![false; nodes.len()];
        let mut navigations = Vec::new();
        for node in nodes {
            let parents_at_root = !node.parents.is_empty() && node.parents.iter().all(|p| at_root[p.0]);
            at_root[node.id.0] = match node.kind {
                ContextKind::Root => true,
                ContextKind::Navigation { navigation } => {
                    if parents_at_root && !navigations.contains(&navigation) {
                        navigations.push(navigation);
                    }
                    false
                }
                ContextKind::Empty => false,
                _ => parents_at_root,
            };
        }
        navigations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cardinality;

    struct Fixture {
        model: Model,
        person: EntityTypeId,
        pets: MemberId,
        kind: MemberId,
        age: MemberId,
    }

    fn fixture() -> Fixture {
        let mut builder = Model::builder();
        let person = builder.entity("Person");
        let pet = builder.entity("Pet");
        builder.property(person, "name");
        let kind = builder.property(pet, "kind");
        let age = builder.property(pet, "age");
        let (pets, _) = builder.relationship(person, "pets", Cardinality::Many, pet, "owner", Cardinality::One);
        builder.navigation(person, "mentors", Cardinality::Many, person);
        Fixture { model: builder.build(), person, pets, kind, age }
    }

    fn compile(f: &Fixture, expr: &str) -> Result<CompiledExpression, ConfigurationError> {
        let expr = Expr::try_from(expr)?;
        CompiledExpression::compile(&f.model, f.person, &expr, None)
    }

    #[test]
    fn test_observed_members() -> anyhow::Result<()> {
        let f = fixture();
        let compiled = compile(&f, "p => p.pets.where(x => x.kind == 'Cat').count()")?;
        assert_eq!(compiled.observed, vec![ObservedMember::Property(f.kind), ObservedMember::Navigation(f.pets)]);
        assert!(compiled.is_partial());
        assert_eq!(compiled.root_navigations(), vec![f.pets]);
        Ok(())
    }

    #[test]
    fn test_non_linear_consumers_load_everything() -> anyhow::Result<()> {
        let f = fixture();
        assert!(compile(&f, "p => p.pets.sum(x => x.age * 2)")?.is_partial());
        assert!(!compile(&f, "p => p.pets.max(x => x.age)")?.is_partial());
        assert!(!compile(&f, "p => p.pets.count() > 1")?.is_partial());
        assert!(!compile(&f, "p => p.pets.any()")?.is_partial());
        assert!(!compile(&f, "p => p.pets.count() * p.pets.count()")?.is_partial());
        assert!(!compile(&f, "p => p.pets.count() / 2")?.is_partial());
        assert!(compile(&f, "p => p.pets.count() / 2.0")?.is_partial());
        assert!(!compile(&f, "p => int(p.pets.sum(x => x.age))")?.is_partial());
        assert!(!compile(&f, "p => float(p.pets.count())")?.is_partial());
        assert!(!compile(&f, "p => p.name + untracked(p.pets).count()")?.is_partial());
        assert_eq!(compile(&f, "p => p.pets.sum(x => x.age)")?.dependencies(), BTreeSet::from([f.pets, f.age]));
        Ok(())
    }

    #[test]
    fn test_configuration_errors() {
        let f = fixture();
        assert!(matches!(compile(&f, "p => 1 + 2"), Err(ConfigurationError::NoObservedMembers)));
        assert!(matches!(compile(&f, "p => p.mentors.count()"), Ok(_)));
        assert!(matches!(compile(&f, "p => p.mentors.count(m => m.name == 'x')"), Err(ConfigurationError::MissingInverse(_))));
        assert!(matches!(compile(&f, "p => p.nickname"), Err(ConfigurationError::UnknownMember { .. })));
        assert!(matches!(compile(&f, "p => q.name"), Err(ConfigurationError::UnknownParameter(_))));
        assert!(matches!(compile(&f, "p => p.pets.select(x => x.age).where(a => a.kind)"), Err(ConfigurationError::Unsupported(_))));
        assert!(matches!(compile(&f, "p => p.pets.where()"), Err(ConfigurationError::Unsupported(_))));
    }

    #[test]
    fn test_filter_does_not_force_loading() -> anyhow::Result<()> {
        let f = fixture();
        let expr = Expr::try_from("p => p.pets.count()")?;
        let filter = Expr::try_from("p => p.pets.count() > 0")?;
        let compiled = CompiledExpression::compile(&f.model, f.person, &expr, Some(&filter))?;
        assert!(compiled.is_partial());
        assert!(compiled.filter_node.is_some());
        Ok(())
    }
}
