use std::collections::HashMap;

use dashmap::DashMap;
use tracing::trace;

use crate::entity::{Entity, ValueSide};
use crate::error::StorageError;
use crate::input::MutationInput;
use crate::model::MemberId;

/// Navigation values loaded during one `get_changes` call, shared by all evaluations of the batch
#[derive(Debug, Default)]
pub struct NavigationCache {
    loaded: DashMap<(Entity, MemberId, ValueSide), Vec<Entity>>,
}

impl NavigationCache {
    pub fn new() -> Self { Self::default() }

    /// Related entities of each of `entities`, loading the missing ones with a single adapter call
    pub async fn load(
        &self,
        input: &dyn MutationInput,
        entities: &[Entity],
        navigation: MemberId,
        side: ValueSide,
    ) -> Result<HashMap<Entity, Vec<Entity>>, StorageError> {
        let mut missing: Vec<Entity> = entities.iter().copied().filter(|e| !self.loaded.contains_key(&(*e, navigation, side))).collect();
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            trace!("loading {:?} {} for {} entities", navigation, side, missing.len());
            let mut loaded = input.load_navigation(&missing, navigation, side).await?;
            for entity in missing {
                let related = loaded.remove(&entity).unwrap_or_default();
                self.loaded.insert((entity, navigation, side), related);
            }
        }
        Ok(entities
            .iter()
            .map(|e| (*e, self.loaded.get(&(*e, navigation, side)).map(|r| r.clone()).unwrap_or_default()))
            .collect())
    }

    pub async fn load_one(&self, input: &dyn MutationInput, entity: Entity, navigation: MemberId, side: ValueSide) -> Result<Vec<Entity>, StorageError> {
        let mut loaded = self.load(input, &[entity], navigation, side).await?;
        Ok(loaded.remove(&entity).unwrap_or_default())
    }

    pub fn len(&self) -> usize { self.loaded.len() }

    pub fn is_empty(&self) -> bool { self.loaded.is_empty() }
}
