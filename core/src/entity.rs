use crate::id::EntityId;
use crate::model::EntityTypeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to a stored entity together with its type
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub ty: EntityTypeId,
}

impl Entity {
    pub fn new(id: EntityId, ty: EntityTypeId) -> Self { Self { id, ty } }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}:{:#}", self.ty.0, self.id) }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Entity({})", self) }
}

/// Mutation state of an entity within the current batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl EntityState {
    /// Whether the entity exists on the given side of the batch
    pub fn exists_on(&self, side: ValueSide) -> bool {
        !matches!((self, side), (EntityState::Added, ValueSide::Original) | (EntityState::Removed, ValueSide::Current))
    }
}

/// Which side of a mutation batch a value is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueSide {
    Original,
    Current,
}

impl ValueSide {
    pub const BOTH: [ValueSide; 2] = [ValueSide::Original, ValueSide::Current];
}

impl fmt::Display for ValueSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSide::Original => write!(f, "original"),
            ValueSide::Current => write!(f, "current"),
        }
    }
}
