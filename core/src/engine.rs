use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rollup_expr::Expr;
use tokio::sync::OnceCell;

use crate::action_debug;
use crate::analysis::CompiledExpression;
use crate::calculation::ChangeCalculation;
use crate::computed::{ComputedGraph, ComputedMember, ComputedNavigation, ComputedProperty};
use crate::config::EngineConfig;
use crate::error::ConfigurationError;
use crate::model::{EntityTypeId, MemberDef, MemberId, Model};
use crate::provider::ChangesProvider;

/// `(entity type, expression, filter)`, expressions in their canonical printed form
type CompileKey = (EntityTypeId, String, Option<String>);

/// Registry of compiled expressions for one model.
///
/// Every `(entity type, expression, filter)` is compiled once for the lifetime of the engine, even
/// when first requested from several tasks at once.
pub struct Engine {
    model: Arc<Model>,
    config: EngineConfig,
    compiled: DashMap<CompileKey, Arc<OnceCell<Arc<CompiledExpression>>>>,
    compilations: AtomicUsize,
}

impl Engine {
    pub fn new(model: Arc<Model>, config: EngineConfig) -> Self { Self { model, config, compiled: DashMap::new(), compilations: AtomicUsize::new(0) } }

    pub fn model(&self) -> &Arc<Model> { &self.model }

    pub fn config(&self) -> &EngineConfig { &self.config }

    /// How many expressions were actually compiled (cache misses)
    pub fn compilation_count(&self) -> usize { self.compilations.load(Ordering::Relaxed) }

    pub async fn compile(&self, entity_type: &str, expression: &str, filter: Option<&str>) -> Result<Arc<CompiledExpression>, ConfigurationError> {
        let ty = self.entity_type(entity_type)?;
        let expression = Expr::try_from(expression)?;
        let filter = filter.map(|f| Expr::try_from(f)).transpose()?;
        self.compile_expr(ty, expression, filter).await
    }

    pub async fn compile_expr(&self, entity_type: EntityTypeId, expression: Expr, filter: Option<Expr>) -> Result<Arc<CompiledExpression>, ConfigurationError> {
        let key = (entity_type, expression.to_string(), filter.as_ref().map(|f| f.to_string()));
        // the map guard must not be held across the await below
        let cell = self.compiled.entry(key).or_insert_with(|| Arc::new(OnceCell::new())).clone();
        let compiled = cell
            .get_or_try_init(|| async {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                action_debug!("Engine", "compile", "{}", expression);
                CompiledExpression::compile(&self.model, entity_type, &expression, filter.as_ref()).map(Arc::new)
            })
            .await?;
        Ok(compiled.clone())
    }

    pub async fn changes_provider<C: ChangeCalculation>(
        &self,
        entity_type: &str,
        expression: &str,
        filter: Option<&str>,
        calculation: C,
    ) -> Result<ChangesProvider<C>, ConfigurationError> {
        let compiled = self.compile(entity_type, expression, filter).await?;
        Ok(ChangesProvider::new(compiled, calculation, self.config.clone()))
    }

    /// Declare `entity_type.property` as computed from `expression`
    pub async fn computed_property<C: ChangeCalculation>(
        &self,
        entity_type: &str,
        property: &str,
        expression: &str,
        filter: Option<&str>,
        calculation: C,
    ) -> Result<ComputedProperty<C>, ConfigurationError> {
        let member = self.member(entity_type, property)?;
        let provider = self.member_provider(member, expression, filter, calculation).await?;
        ComputedProperty::new(self.model.clone(), member, provider)
    }

    /// Declare `entity_type.navigation` as computed from an entity-valued `expression`. With
    /// `controlled_fields`, consistency matches stored and computed entities on those fields.
    pub async fn computed_navigation<C: ChangeCalculation>(
        &self,
        entity_type: &str,
        navigation: &str,
        expression: &str,
        filter: Option<&str>,
        calculation: C,
        controlled_fields: &[&str],
    ) -> Result<ComputedNavigation<C>, ConfigurationError> {
        let member = self.member(entity_type, navigation)?;
        let provider = self.member_provider(member, expression, filter, calculation).await?;
        let computed = ComputedNavigation::new(self.model.clone(), member, provider)?;
        if controlled_fields.is_empty() {
            Ok(computed)
        } else {
            computed.with_controlled_fields(controlled_fields)
        }
    }

    pub fn computed_graph(&self, members: Vec<Box<dyn ComputedMember>>) -> Result<ComputedGraph, ConfigurationError> { ComputedGraph::new(members, &self.config) }

    async fn member_provider<C: ChangeCalculation>(
        &self,
        member: MemberId,
        expression: &str,
        filter: Option<&str>,
        calculation: C,
    ) -> Result<ChangesProvider<C>, ConfigurationError> {
        let name = self.model.qualified_name(member);
        let entity_type = self.model.member(member).declaring_type;
        let result = async {
            let expression = Expr::try_from(expression)?;
            let filter = filter.map(|f| Expr::try_from(f)).transpose()?;
            self.compile_expr(entity_type, expression, filter).await
        }
        .await;
        let compiled = result.map_err(|e| e.for_member(name))?;
        Ok(ChangesProvider::new(compiled, calculation, self.config.clone()))
    }

    fn entity_type(&self, name: &str) -> Result<EntityTypeId, ConfigurationError> {
        self.model.entity_type(name).map(|t| t.id).ok_or_else(|| ConfigurationError::UnknownEntityType(name.to_string()))
    }

    fn member(&self, entity_type: &str, name: &str) -> Result<MemberId, ConfigurationError> {
        let ty = self.entity_type(entity_type)?;
        self.model
            .member_by_name(ty, name)
            .map(|m: &MemberDef| m.id)
            .ok_or_else(|| ConfigurationError::UnknownMember { entity_type: entity_type.to_string(), member: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::NumberDeltaCalculation;
    use crate::model::Cardinality;

    fn engine() -> Engine {
        let mut builder = Model::builder();
        let person = builder.entity("Person");
        let pet = builder.entity("Pet");
        builder.property(person, "pet_count");
        builder.property(pet, "kind");
        builder.relationship(person, "pets", Cardinality::Many, pet, "owner", Cardinality::One);
        Engine::new(Arc::new(builder.build()), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_compile_once() -> anyhow::Result<()> {
        let engine = engine();
        let a = engine.compile("Person", "p => p.pets.count()", None).await?;
        // same expression, different spacing
        let b = engine.compile("Person", "p =>   p.pets.count()", None).await?;
        assert!(Arc::ptr_eq(&a, &b));
        engine.compile("Person", "p => p.pets.count()", Some("p => p.pet_count > 0")).await?;
        assert_eq!(engine.compilation_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_member_errors() -> anyhow::Result<()> {
        let engine = engine();
        assert!(matches!(engine.compile("Robot", "r => r.id", None).await, Err(ConfigurationError::UnknownEntityType(_))));
        assert!(matches!(
            engine.computed_property("Person", "age", "p => p.pets.count()", None, NumberDeltaCalculation).await,
            Err(ConfigurationError::UnknownMember { .. })
        ));
        match engine.computed_property("Person", "pet_count", "p => p.pets.sum(x => x.weight)", None, NumberDeltaCalculation).await {
            Err(ConfigurationError::Member { member, source }) => {
                assert_eq!(member, "Person.pet_count");
                assert!(matches!(*source, ConfigurationError::UnknownMember { .. }));
            }
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("expected an error"),
        }
        Ok(())
    }
}
