pub mod analysis;
pub mod cache;
pub mod calculation;
pub mod changeset;
pub mod computed;
pub mod config;
pub mod context;
pub mod engine;
pub mod entity;
pub mod error;
pub mod eval;
pub mod id;
pub mod incremental;
pub mod input;
pub mod member;
pub mod model;
pub mod provider;
pub mod storage;
pub mod util;
pub mod value;

pub use analysis::CompiledExpression;
pub use calculation::{
    ChangeCalculation, CurrentValueCalculation, NumberDeltaCalculation, SetChange, SetDeltaCalculation, ValueChange, ValueChangeCalculation,
    VoidCalculation,
};
pub use changeset::Changeset;
pub use computed::{ComputedGraph, ComputedMember, ComputedNavigation, ComputedProperty, ConsistencyReport};
pub use config::EngineConfig;
pub use engine::Engine;
pub use entity::{Entity, EntityState, ValueSide};
pub use id::EntityId;
pub use input::{MutableInput, MutationInput};
pub use model::Model;
pub use provider::{ChangeMemory, ChangesProvider};
pub use value::Value;

pub use rollup_expr as expr;
