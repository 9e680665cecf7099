//! Computed members: properties and navigations whose stored value is derived from an expression
//! and kept up to date by applying the changes of every mutation batch.

mod consistency;
mod graph;
mod navigation;
mod property;

pub use graph::ComputedGraph;
pub use navigation::ComputedNavigation;
pub use property::ComputedProperty;

use std::any::Any;
use std::collections::BTreeSet;

use async_trait::async_trait;
use rollup_expr::Expr;

use crate::changeset::Changeset;
use crate::entity::Entity;
use crate::error::{EvaluationError, UpdateError};
use crate::input::{MutableInput, MutationInput};
use crate::model::MemberId;

/// Opaque per-member state carried across the update rounds of one batch
pub struct UpdateMemory(Box<dyn Any + Send + Sync>);

impl UpdateMemory {
    pub fn new<T: Any + Send + Sync>(memory: T) -> Self { Self(Box::new(memory)) }

    fn downcast<T: Any>(&mut self) -> Result<&mut T, UpdateError> { self.0.downcast_mut::<T>().ok_or(UpdateError::InvalidMemory) }
}

impl std::fmt::Debug for UpdateMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "UpdateMemory") }
}

/// Outcome of a consistency check. Mismatches are data, not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub checked: usize,
    pub inconsistent: Vec<Entity>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool { self.inconsistent.is_empty() }
}

#[async_trait]
pub trait ComputedMember: Send + Sync {
    fn member(&self) -> MemberId;

    /// Qualified name, `Type.member`
    fn name(&self) -> &str;

    /// Every member the expression reads
    fn dependencies(&self) -> BTreeSet<MemberId>;

    fn new_memory(&self) -> UpdateMemory;

    /// Apply the changes of the current batch to the stored values and return what was written.
    /// With a memory, only what changed since the previous call with that memory is applied.
    async fn update(&self, input: &dyn MutableInput, memory: Option<&mut UpdateMemory>) -> Result<Changeset, UpdateError>;

    /// Recompute and store the value of one entity. True when the stored value changed.
    async fn fix(&self, input: &dyn MutableInput, entity: Entity) -> Result<bool, UpdateError>;

    /// Compare stored and computed values of `entities` on the current state. Entities that do not
    /// exist or are filtered out are skipped.
    async fn check_consistency(&self, input: &dyn MutationInput, entities: &[Entity]) -> Result<ConsistencyReport, EvaluationError>;

    /// `e => bool`, true when the stored value of `e` matches the computed one
    fn consistency_predicate(&self) -> &Expr;
}
