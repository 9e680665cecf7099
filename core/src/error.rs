use crate::entity::{Entity, ValueSide};
use crate::model::MemberId;
use crate::value::ValueType;
use thiserror::Error;

/// Failures reported by a persistence adapter
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entity {0} not found")]
    EntityNotFound(Entity),
    #[error("{member:?} is not a {expected}")]
    WrongMemberKind { member: MemberId, expected: &'static str },
    #[error("Storage lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Build-time errors: the expression or the set of computed members cannot be compiled
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Expression does not observe any member")]
    NoObservedMembers,
    #[error("Navigation {0} needs an inverse to propagate changes")]
    MissingInverse(String),
    #[error("Unknown entity type {0}")]
    UnknownEntityType(String),
    #[error("{entity_type} has no member named {member}")]
    UnknownMember { entity_type: String, member: String },
    #[error("Unknown parameter {0}")]
    UnknownParameter(String),
    #[error("Unsupported expression: {0}")]
    Unsupported(String),
    #[error("Cyclic dependency between computed members: {0}")]
    CyclicDependency(String),
    #[error("Computed member {member}: {source}")]
    Member {
        member: String,
        #[source]
        source: Box<ConfigurationError>,
    },
    #[error("Parse error: {0}")]
    Parse(#[from] rollup_expr::ParseError),
}

impl ConfigurationError {
    /// Attribute an analysis failure to a computed member. Already attributed errors are kept as is.
    pub fn for_member(self, member: impl Into<String>) -> Self {
        match self {
            ConfigurationError::Member { .. } => self,
            other => ConfigurationError::Member { member: member.into(), source: Box::new(other) },
        }
    }
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("{entity} has no {side} value")]
    InvalidState { entity: Entity, side: ValueSide },
    #[error("Type mismatch in {operation}: got {found:?}")]
    TypeMismatch { operation: &'static str, found: ValueType },
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Cyclic update of {member:?} on {entity}")]
    CyclicUpdate { member: MemberId, entity: Entity },
    #[error("Computed members did not settle within {0} rounds")]
    RoundLimit(usize),
    #[error("Update memory was created by a different computed member")]
    InvalidMemory,
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
