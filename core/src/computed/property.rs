use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use rollup_expr::Expr;
use tracing::debug;

use super::consistency::{check, property_predicate};
use super::{ComputedMember, ConsistencyReport, UpdateMemory};
use crate::analysis::CompiledExpression;
use crate::calculation::{ChangeCalculation, EvaluatedValues};
use crate::changeset::Changeset;
use crate::entity::{Entity, EntityState, ValueSide};
use crate::error::{ConfigurationError, EvaluationError, UpdateError};
use crate::input::{MutableInput, MutationInput};
use crate::model::{MemberId, Model};
use crate::provider::{ChangeMemory, ChangesProvider};
use crate::value::Value;

/// A stored property maintained from the changes of an expression
pub struct ComputedProperty<C: ChangeCalculation> {
    property: MemberId,
    name: String,
    provider: ChangesProvider<C>,
    model: Arc<Model>,
    predicate_expr: Expr,
    predicate: CompiledExpression,
}

impl<C: ChangeCalculation> ComputedProperty<C> {
    pub fn new(model: Arc<Model>, property: MemberId, provider: ChangesProvider<C>) -> Result<Self, ConfigurationError> {
        let name = model.qualified_name(property);
        let predicate_expr = property_predicate(&provider.compiled().expression, &model.member(property).name, None).map_err(|e| e.for_member(&name))?;
        let predicate = compile_predicate(&model, &provider, &predicate_expr).map_err(|e| e.for_member(&name))?;
        Ok(Self { property, name, provider, model, predicate_expr, predicate })
    }

    /// Compare stored and computed values with a `(stored, computed) => bool` lambda instead of `==`
    pub fn with_comparer(mut self, comparer: &str) -> Result<Self, ConfigurationError> {
        let comparer = Expr::try_from(comparer).map_err(|e| ConfigurationError::from(e).for_member(&self.name))?;
        let member = &self.model.member(self.property).name;
        self.predicate_expr =
            property_predicate(&self.provider.compiled().expression, member, Some(&comparer)).map_err(|e| e.for_member(&self.name))?;
        self.predicate = compile_predicate(&self.model, &self.provider, &self.predicate_expr).map_err(|e| e.for_member(&self.name))?;
        Ok(self)
    }

    pub fn provider(&self) -> &ChangesProvider<C> { &self.provider }
}

pub(super) fn compile_predicate<C: ChangeCalculation>(
    model: &Model,
    provider: &ChangesProvider<C>,
    predicate: &Expr,
) -> Result<CompiledExpression, ConfigurationError> {
    let compiled = provider.compiled();
    CompiledExpression::compile_unchecked(model, compiled.entity_type, predicate, compiled.filter.as_ref())
}

#[async_trait]
impl<C: ChangeCalculation> ComputedMember for ComputedProperty<C> {
    fn member(&self) -> MemberId { self.property }

    fn name(&self) -> &str { &self.name }

    fn dependencies(&self) -> BTreeSet<MemberId> { self.provider.compiled().dependencies() }

    fn new_memory(&self) -> UpdateMemory { UpdateMemory::new(ChangeMemory::<C::Change>::new()) }

    async fn update(&self, input: &dyn MutableInput, memory: Option<&mut UpdateMemory>) -> Result<Changeset, UpdateError> {
        let memory = match memory {
            Some(memory) => Some(memory.downcast::<ChangeMemory<C::Change>>()?),
            None => None,
        };
        let mut changes: Vec<(Entity, C::Change)> = self.provider.get_changes(input.as_input(), memory).await?.into_iter().collect();
        changes.sort_by_key(|(entity, _)| *entity);

        let written = Changeset::new();
        for (entity, change) in changes {
            if input.state(entity) == EntityState::Removed {
                continue;
            }
            let stored = input.load_property(entity, self.property, ValueSide::Current).await?;
            let value = self.provider.calculation().apply_change(&stored, &change)?;
            if value == stored {
                continue;
            }
            input.set_property(entity, self.property, value.clone()).await?;
            written.record_property(self.property, entity, Some(stored), Some(value));
        }
        debug!("{}: wrote {} values", self.name, written.len());
        Ok(written)
    }

    async fn fix(&self, input: &dyn MutableInput, entity: Entity) -> Result<bool, UpdateError> {
        let current = self.provider.current_value(input.as_input(), entity).await?;
        let calculation = self.provider.calculation();
        let value = calculation.apply_change(&Value::Null, &calculation.get_change(EvaluatedValues { original: None, current })?)?;
        let stored = input.load_property(entity, self.property, ValueSide::Current).await?;
        if value == stored {
            return Ok(false);
        }
        input.set_property(entity, self.property, value).await?;
        Ok(true)
    }

    async fn check_consistency(&self, input: &dyn MutationInput, entities: &[Entity]) -> Result<ConsistencyReport, EvaluationError> {
        check(&self.predicate, input, entities).await
    }

    fn consistency_predicate(&self) -> &Expr { &self.predicate_expr }
}
