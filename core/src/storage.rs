//! Persistence adapters. Anything implementing [`MutationInput`](crate::input::MutationInput) and
//! [`MutableInput`](crate::input::MutableInput) can drive the engine; [`memory`] is a complete
//! in-process adapter used by the tests.

pub mod memory;

pub use memory::{Batch, MemoryStore};
