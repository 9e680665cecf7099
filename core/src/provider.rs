use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;

use crate::action_debug;
use crate::analysis::CompiledExpression;
use crate::cache::NavigationCache;
use crate::calculation::{ChangeCalculation, EvaluatedValues};
use crate::changeset::Changeset;
use crate::config::EngineConfig;
use crate::entity::{Entity, ValueSide};
use crate::error::EvaluationError;
use crate::eval::Evaluator;
use crate::incremental::IncrementalContext;
use crate::input::MutationInput;
use crate::value::Value;

/// What a provider reported so far for a batch that is still being modified (between update rounds).
#[derive(Debug)]
pub struct ChangeMemory<T> {
    previous: Option<Changeset>,
    reported: HashMap<Entity, T>,
}

impl<T> Default for ChangeMemory<T> {
    fn default() -> Self { Self { previous: None, reported: HashMap::new() } }
}

impl<T> ChangeMemory<T> {
    pub fn new() -> Self { Self::default() }

    /// Total change reported so far per entity
    pub fn reported(&self) -> &HashMap<Entity, T> { &self.reported }

    pub fn is_empty(&self) -> bool { self.previous.is_none() }
}

/// Computes the changes of one compiled expression over a mutation batch
pub struct ChangesProvider<C: ChangeCalculation> {
    compiled: Arc<CompiledExpression>,
    calculation: C,
    config: EngineConfig,
}

impl<C: ChangeCalculation> ChangesProvider<C> {
    pub fn new(compiled: Arc<CompiledExpression>, calculation: C, config: EngineConfig) -> Self { Self { compiled, calculation, config } }

    pub fn compiled(&self) -> &CompiledExpression { &self.compiled }

    pub fn calculation(&self) -> &C { &self.calculation }

    /// Whether values are computed from the recorded related entities only
    pub fn is_incremental(&self) -> bool {
        self.config.incremental
            && self.calculation.is_incremental()
            && !(self.calculation.deduplicates() && self.compiled.is_partial())
    }

    /// Changes of every affected entity, no-ops left out.
    ///
    /// With a memory, the batch is compared with what was seen in the previous call: only entities
    /// touched since then are evaluated, and what is reported for them is the difference between their
    /// total change and the change reported before.
    pub async fn get_changes(
        &self,
        input: &dyn MutationInput,
        memory: Option<&mut ChangeMemory<C::Change>>,
    ) -> Result<HashMap<Entity, C::Change>, EvaluationError> {
        let raw = Changeset::capture(input, &self.compiled.observed).await?;
        let incremental = IncrementalContext::new();
        let cache = NavigationCache::new();
        let affected = self.compiled.graph.affected_entities(&raw, input, &incremental, &cache).await?;

        let Some(memory) = memory else {
            action_debug!(self.compiled.expression, "get_changes", "{} affected entities", affected.len());
            let evaluated = self.evaluate(input, &affected, &incremental, &cache).await?;
            return Ok(evaluated
                .into_iter()
                .filter_map(|(entity, change)| change.map(|c| (entity, c)))
                .filter(|(_, change)| !self.calculation.is_no_change(change))
                .collect());
        };

        let candidates = match &memory.previous {
            Some(previous) => {
                let delta = raw.delta_from(previous);
                let scratch = IncrementalContext::new();
                self.compiled.graph.affected_entities(&delta, input, &scratch, &cache).await?
            }
            None => affected.clone(),
        };
        action_debug!(self.compiled.expression, "get_changes", "{} affected entities, {} touched since last call", affected.len(), candidates.len());

        let mut changes = HashMap::new();
        for (entity, total) in self.evaluate(input, &candidates, &incremental, &cache).await? {
            let total = match total {
                Some(total) => total,
                None => self.calculation.get_change(EvaluatedValues::default())?,
            };
            let change = match memory.reported.get(&entity) {
                Some(previous) => self.calculation.delta_change(previous, &total)?,
                None => total.clone(),
            };
            memory.reported.insert(entity, total);
            if !self.calculation.is_no_change(&change) {
                changes.insert(entity, change);
            }
        }
        memory.previous = Some(raw);
        Ok(changes)
    }

    /// The current value of the expression for `entity`, evaluated in full
    pub async fn current_value(&self, input: &dyn MutationInput, entity: Entity) -> Result<Option<Value>, EvaluationError> {
        let cache = NavigationCache::new();
        let evaluator = Evaluator::new(&self.compiled, input, &cache, ValueSide::Current);
        if !input.state(entity).exists_on(ValueSide::Current) || !evaluator.passes_filter(entity).await? {
            return Ok(None);
        }
        Ok(Some(evaluator.value(entity).await?))
    }

    /// `None` for entities absent or filtered out on both sides
    async fn evaluate(
        &self,
        input: &dyn MutationInput,
        entities: &BTreeSet<Entity>,
        incremental: &IncrementalContext,
        cache: &NavigationCache,
    ) -> Result<Vec<(Entity, Option<C::Change>)>, EvaluationError> {
        if self.calculation.preload_entities() && self.config.prefetch {
            self.prefetch(input, entities, cache).await?;
        }
        let incremental = if self.is_incremental() { Some(incremental) } else { None };
        try_join_all(entities.iter().map(|entity| self.evaluate_entity(input, *entity, incremental, cache))).await
    }

    async fn evaluate_entity(
        &self,
        input: &dyn MutationInput,
        entity: Entity,
        incremental: Option<&IncrementalContext>,
        cache: &NavigationCache,
    ) -> Result<(Entity, Option<C::Change>), EvaluationError> {
        let state = input.state(entity);
        let mut present = Vec::with_capacity(2);
        for side in ValueSide::BOTH {
            // filters are always evaluated in full
            if state.exists_on(side) && Evaluator::new(&self.compiled, input, cache, side).passes_filter(entity).await? {
                present.push(side);
            }
        }
        if present.is_empty() {
            return Ok((entity, None));
        }
        // a value that only exists on one side has nothing to be partial against
        let incremental = incremental.filter(|_| present.len() == 2);

        let mut values = EvaluatedValues::default();
        for side in present {
            if side == ValueSide::Original && !self.calculation.requires_original() {
                continue;
            }
            let mut evaluator = Evaluator::new(&self.compiled, input, cache, side);
            if let Some(incremental) = incremental {
                evaluator = evaluator.incremental(incremental);
            }
            let value = evaluator.value(entity).await?;
            match side {
                ValueSide::Original => values.original = Some(value),
                ValueSide::Current => values.current = Some(value),
            }
        }
        Ok((entity, Some(self.calculation.get_change(values)?)))
    }

    /// Load the root navigations of every entity up front, one adapter call per navigation and side
    async fn prefetch(&self, input: &dyn MutationInput, entities: &BTreeSet<Entity>, cache: &NavigationCache) -> Result<(), EvaluationError> {
        for navigation in self.compiled.root_navigations() {
            for side in ValueSide::BOTH {
                let valid: Vec<Entity> = entities.iter().copied().filter(|e| input.state(*e).exists_on(side)).collect();
                if !valid.is_empty() {
                    cache.load(input, &valid, navigation, side).await?;
                }
            }
        }
        Ok(())
    }
}
