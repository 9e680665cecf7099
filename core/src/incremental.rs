use std::collections::HashSet;

use dashmap::{DashMap, DashSet};

use crate::entity::Entity;
use crate::model::MemberId;

/// Scratch memory of one mutation batch.
///
/// While affected entities are discovered, every related entity seen through a navigation is recorded
/// under `(entity, navigation)`. Incremental evaluation then only visits those instead of loading the
/// whole collection. Entities flagged load-all are always evaluated from fully loaded navigations.
#[derive(Debug, Default)]
pub struct IncrementalContext {
    related: DashMap<(Entity, MemberId), HashSet<Entity>>,
    load_all: DashSet<Entity>,
}

impl IncrementalContext {
    pub fn new() -> Self { Self::default() }

    pub fn record(&self, entity: Entity, navigation: MemberId, related: Entity) {
        self.related.entry((entity, navigation)).or_default().insert(related);
    }

    pub fn record_all(&self, entity: Entity, navigation: MemberId, related: impl IntoIterator<Item = Entity>) {
        self.related.entry((entity, navigation)).or_default().extend(related);
    }

    /// Related entities recorded for `entity.navigation`; empty when nothing beneath it changed
    pub fn related(&self, entity: Entity, navigation: MemberId) -> Vec<Entity> {
        let mut related: Vec<Entity> = self.related.get(&(entity, navigation)).map(|r| r.iter().copied().collect()).unwrap_or_default();
        related.sort();
        related
    }

    pub fn mark_load_all(&self, entity: Entity) { self.load_all.insert(entity); }

    pub fn is_load_all(&self, entity: Entity) -> bool { self.load_all.contains(&entity) }

    pub fn len(&self) -> usize { self.related.len() }

    pub fn is_empty(&self) -> bool { self.related.is_empty() && self.load_all.is_empty() }
}
