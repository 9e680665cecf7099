use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use rollup_expr::Expr;
use tracing::debug;

use super::consistency::{check, collection_predicate, reference_predicate};
use super::property::compile_predicate;
use super::{ComputedMember, ConsistencyReport, UpdateMemory};
use crate::analysis::CompiledExpression;
use crate::calculation::{ChangeCalculation, EvaluatedValues};
use crate::changeset::Changeset;
use crate::entity::{Entity, EntityState, ValueSide};
use crate::error::{ConfigurationError, EvaluationError, UpdateError};
use crate::input::{MutableInput, MutationInput};
use crate::model::{Cardinality, MemberId, Model};
use crate::provider::{ChangeMemory, ChangesProvider};
use crate::value::Value;

/// A stored navigation maintained from the changes of an entity-valued expression
pub struct ComputedNavigation<C: ChangeCalculation> {
    navigation: MemberId,
    name: String,
    collection: bool,
    provider: ChangesProvider<C>,
    model: Arc<Model>,
    predicate_expr: Expr,
    predicate: CompiledExpression,
}

impl<C: ChangeCalculation> ComputedNavigation<C> {
    pub fn new(model: Arc<Model>, navigation: MemberId, provider: ChangesProvider<C>) -> Result<Self, ConfigurationError> {
        let name = model.qualified_name(navigation);
        let Some(def) = model.navigation(navigation) else {
            return Err(ConfigurationError::Unsupported(format!("{} is not a navigation", name)));
        };
        let collection = def.cardinality == Cardinality::Many;
        let member = &model.member(navigation).name;
        let predicate_expr = if collection {
            collection_predicate(&provider.compiled().expression, member, &[])
        } else {
            reference_predicate(&provider.compiled().expression, member)
        }
        .map_err(|e| e.for_member(&name))?;
        let predicate = compile_predicate(&model, &provider, &predicate_expr).map_err(|e| e.for_member(&name))?;
        Ok(Self { navigation, name, collection, provider, model, predicate_expr, predicate })
    }

    /// Consider a stored and a computed entity the same when all of `fields` are equal, rather than
    /// when they are the same entity
    pub fn with_controlled_fields(mut self, fields: &[&str]) -> Result<Self, ConfigurationError> {
        if !self.collection {
            return Err(ConfigurationError::Unsupported(format!("{} is a reference navigation", self.name)).for_member(&self.name));
        }
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let member = &self.model.member(self.navigation).name;
        self.predicate_expr = collection_predicate(&self.provider.compiled().expression, member, &fields).map_err(|e| e.for_member(&self.name))?;
        self.predicate = compile_predicate(&self.model, &self.provider, &self.predicate_expr).map_err(|e| e.for_member(&self.name))?;
        Ok(self)
    }

    pub fn provider(&self) -> &ChangesProvider<C> { &self.provider }

    async fn stored(&self, input: &dyn MutableInput, entity: Entity) -> Result<Value, UpdateError> {
        let related = input.load_related(entity, self.navigation, ValueSide::Current).await?;
        Ok(if self.collection {
            Value::Set(related.into_iter().map(Value::Entity).collect())
        } else {
            related.first().map(|e| Value::Entity(*e)).unwrap_or(Value::Null)
        })
    }

    /// Store `value` as the related entities of `entity`, returning the previous and new sets
    async fn write(
        &self,
        input: &dyn MutableInput,
        entity: Entity,
        stored: &Value,
        value: &Value,
    ) -> Result<Option<(BTreeSet<Entity>, BTreeSet<Entity>)>, UpdateError> {
        let (before, after) = (stored.entities(), value.entities());
        if before == after {
            return Ok(None);
        }
        input.set_navigation(entity, self.navigation, after.iter().copied().collect()).await?;
        Ok(Some((before, after)))
    }
}

#[async_trait]
impl<C: ChangeCalculation> ComputedMember for ComputedNavigation<C> {
    fn member(&self) -> MemberId { self.navigation }

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
            let stored = self.stored(input, entity).await?;
            let value = self.provider.calculation().apply_change(&stored, &change)?;
            if let Some((before, after)) = self.write(input, entity, &stored, &value).await? {
                let added: Vec<Entity> = after.difference(&before).copied().collect();
                let removed: Vec<Entity> = before.difference(&after).copied().collect();
                written.record_navigation(self.navigation, entity, added, removed);
            }
        }
        debug!("{}: rewrote {} navigations", self.name, written.len());
        Ok(written)
    }

    async fn fix(&self, input: &dyn MutableInput, entity: Entity) -> Result<bool, UpdateError> {
        let current = self.provider.current_value(input.as_input(), entity).await?;
        let calculation = self.provider.calculation();
        let value = calculation.apply_change(&Value::Null, &calculation.get_change(EvaluatedValues { original: None, current })?)?;
        let stored = self.stored(input, entity).await?;
        Ok(self.write(input, entity, &stored, &value).await?.is_some())
    }

    async fn check_consistency(&self, input: &dyn MutationInput, entities: &[Entity]) -> Result<ConsistencyReport, EvaluationError> {
        check(&self.predicate, input, entities).await
    }

    fn consistency_predicate(&self) -> &Expr { &self.predicate_expr }
}
