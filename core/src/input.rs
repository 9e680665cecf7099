use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::entity::{Entity, EntityState, ValueSide};
use crate::error::StorageError;
use crate::model::{MemberId, Model};
use crate::value::Value;

/// Structural change of one entity's navigation within a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationDelta {
    pub added: BTreeSet<Entity>,
    pub removed: BTreeSet<Entity>,
}

impl NavigationDelta {
    pub fn is_empty(&self) -> bool { self.added.is_empty() && self.removed.is_empty() }
}

/// A join row of a many-to-many relationship that was inserted or deleted in the batch.
/// Oriented for the navigation it was requested for: `owner.navigation` contains `related`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinChange {
    pub owner: Entity,
    pub related: Entity,
    pub added: bool,
}

/// Read access to a mutation batch: which entities were touched, how, and their values on either side.
///
/// Implemented by the persistence adapter. The engine never caches adapter state across batches.
#[async_trait]
pub trait MutationInput: Send + Sync {
    fn model(&self) -> &Model;

    /// Entities touched by the batch, in any state other than `Unchanged`
    fn entries(&self) -> Vec<Entity>;

    fn state(&self, entity: Entity) -> EntityState;

    fn is_modified(&self, entity: Entity, property: MemberId) -> bool;

    /// `None` when the entity is not an entry or the navigation is unchanged
    fn navigation_delta(&self, entity: Entity, navigation: MemberId) -> Option<NavigationDelta>;

    fn join_changes(&self, navigation: MemberId) -> Vec<JoinChange>;

    async fn load_property(&self, entity: Entity, property: MemberId, side: ValueSide) -> Result<Value, StorageError>;

    /// Bulk load of a navigation. Every requested entity is present in the result.
    async fn load_navigation(
        &self,
        entities: &[Entity],
        navigation: MemberId,
        side: ValueSide,
    ) -> Result<HashMap<Entity, Vec<Entity>>, StorageError>;

    async fn load_related(&self, entity: Entity, navigation: MemberId, side: ValueSide) -> Result<Vec<Entity>, StorageError> {
        let mut loaded = self.load_navigation(&[entity], navigation, side).await?;
        Ok(loaded.remove(&entity).unwrap_or_default())
    }
}

/// Write access used by computed members to store their results in the current batch
#[async_trait]
pub trait MutableInput: MutationInput {
    fn as_input(&self) -> &dyn MutationInput;

    async fn set_property(&self, entity: Entity, property: MemberId, value: Value) -> Result<(), StorageError>;

    async fn set_navigation(&self, entity: Entity, navigation: MemberId, related: Vec<Entity>) -> Result<(), StorageError>;
}
