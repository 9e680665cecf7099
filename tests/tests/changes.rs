mod common;
use std::collections::HashMap;

use anyhow::Result;
use common::*;
use rollup_core::cache::NavigationCache;
use rollup_core::calculation::{EvaluatedValues, ValueChange};
use rollup_core::error::EvaluationError;
use rollup_core::{ChangeCalculation, Engine, EngineConfig, MutationInput, NumberDeltaCalculation, ValueChangeCalculation, Value, ValueSide};

#[tokio::test]
async fn test_adding_a_pet() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    pet(&seed, alice, "X", "Cat", 3)?;
    seed.commit()?;

    let batch = store.batch()?;
    pet(&batch, alice, "Y", "Cat", 1)?;

    let numeric = engine.changes_provider("Person", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    assert!(numeric.is_incremental());
    assert_eq!(numeric.get_changes(&batch, None).await?, HashMap::from([(alice, int(1))]));

    let pairs = engine.changes_provider("Person", "p => p.pets.count()", None, ValueChangeCalculation).await?;
    assert!(!pairs.is_incremental());
    assert_eq!(pairs.get_changes(&batch, None).await?, HashMap::from([(alice, ValueChange { original: int(1), current: int(2) })]));
    Ok(())
}

#[tokio::test]
async fn test_filtered_count_reads_only_changed_pets() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let model = engine.model().clone();
    let (pets, owner) = (member(&model, "Person", "pets"), member(&model, "Pet", "owner"));

    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let x = pet(&seed, alice, "X", "Cat", 3)?;
    pet(&seed, alice, "Rex", "Dog", 5)?;
    pet(&seed, alice, "Tom", "Cat", 2)?;
    seed.commit()?;
    store.reset_load_counts();

    let batch = store.batch()?;
    batch.set(x, "kind", "Dog")?;

    let cats = "p => p.pets.where(x => x.kind == 'Cat').count()";
    let provider = engine.changes_provider("Person", cats, None, NumberDeltaCalculation).await?;
    assert_eq!(provider.get_changes(&batch, None).await?, HashMap::from([(alice, int(-1))]));
    assert_eq!(store.load_count(pets), 0);
    assert!(store.load_count(owner) > 0);

    // the eager evaluator reaches the same result by loading every pet
    let eager = Engine::new(engine.model().clone(), EngineConfig::eager());
    let provider = eager.changes_provider("Person", cats, None, NumberDeltaCalculation).await?;
    assert!(!provider.is_incremental());
    assert_eq!(provider.get_changes(&batch, None).await?, HashMap::from([(alice, int(-1))]));
    assert!(store.load_count(pets) > 0);
    Ok(())
}

#[tokio::test]
async fn test_no_op_suppression() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    let rex = pet(&seed, alice, "Rex", "Dog", 5)?;
    seed.commit()?;

    let batch = store.batch()?;
    batch.set(rex, "name", "Max")?;
    batch.set(bob, "name", "Robert")?;
    let count = engine.changes_provider("Person", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    assert!(count.get_changes(&batch, None).await?.is_empty());

    // both owners are affected by the move, but neither gains or loses a cat
    batch.set_reference(rex, "owner", Some(bob))?;
    let cats = engine.changes_provider("Person", "p => p.pets.where(x => x.kind == 'Cat').count()", None, NumberDeltaCalculation).await?;
    assert!(cats.get_changes(&batch, None).await?.is_empty());
    assert_eq!(count.get_changes(&batch, None).await?, HashMap::from([(alice, int(-1)), (bob, int(1))]));
    Ok(())
}

#[tokio::test]
async fn test_filter_gating() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    seed.set(bob, "active", false)?;
    pet(&seed, alice, "Rex", "Dog", 5)?;
    pet(&seed, alice, "Tom", "Cat", 2)?;
    seed.commit()?;

    let provider = engine.changes_provider("Person", "p => p.pets.count()", Some("p => p.active == true"), NumberDeltaCalculation).await?;

    // leaving the filter retracts the whole value, a filtered out entity reports nothing
    let batch = store.batch()?;
    batch.set(alice, "active", false)?;
    pet(&batch, bob, "Fido", "Dog", 1)?;
    assert_eq!(provider.get_changes(&batch, None).await?, HashMap::from([(alice, int(-2))]));
    batch.commit()?;

    // entering it contributes the whole value, including changes made in the same batch
    let batch = store.batch()?;
    batch.set(bob, "active", true)?;
    pet(&batch, bob, "Spot", "Dog", 4)?;
    assert_eq!(provider.get_changes(&batch, None).await?, HashMap::from([(bob, int(2))]));
    Ok(())
}

#[tokio::test]
async fn test_incremental_matches_eager() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    let carol = person(&seed, "Carol")?;
    let x = pet(&seed, alice, "X", "Cat", 3)?;
    let rex = pet(&seed, alice, "Rex", "Dog", 5)?;
    let tom = pet(&seed, bob, "Tom", "Cat", 2)?;
    pet(&seed, carol, "Fido", "Dog", 9)?;
    seed.commit()?;

    let batch = store.batch()?;
    batch.set(x, "age", 4)?;
    batch.set_reference(rex, "owner", Some(bob))?;
    batch.remove(tom)?;
    pet(&batch, carol, "Kit", "Cat", 1)?;
    let dave = person(&batch, "Dave")?;
    pet(&batch, dave, "Bolt", "Dog", 6)?;

    let eager = Engine::new(engine.model().clone(), EngineConfig::eager());
    let expressions = [
        "p => p.pets.count()",
        "p => p.pets.where(x => x.kind == 'Cat').count()",
        "p => p.pets.sum(x => x.age)",
        "p => p.pets.where(x => x.age > 2).sum(x => x.age * 2)",
        "p => p.pets.count() - p.pets.count(x => x.kind == 'Dog')",
    ];
    for expression in expressions {
        let incremental = engine.changes_provider("Person", expression, None, NumberDeltaCalculation).await?;
        assert!(incremental.is_incremental(), "{}", expression);
        let full = eager.changes_provider("Person", expression, None, NumberDeltaCalculation).await?;
        assert_eq!(incremental.get_changes(&batch, None).await?, full.get_changes(&batch, None).await?, "{}", expression);
    }

    let ages = engine.changes_provider("Person", "p => p.pets.sum(x => x.age)", None, NumberDeltaCalculation).await?;
    assert_eq!(
        ages.get_changes(&batch, None).await?,
        HashMap::from([(alice, int(-4)), (bob, int(3)), (carol, int(1)), (dave, int(6))])
    );
    Ok(())
}

#[tokio::test]
async fn test_applying_changes_reaches_current_value() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    let x = pet(&seed, alice, "X", "Cat", 3)?;
    pet(&seed, bob, "Tom", "Cat", 2)?;
    seed.commit()?;

    let batch = store.batch()?;
    batch.set(x, "age", 8)?;
    pet(&batch, bob, "Kit", "Cat", 1)?;
    batch.set_reference(x, "owner", Some(bob))?;

    let provider = engine.changes_provider("Person", "p => p.pets.sum(x => x.age)", None, NumberDeltaCalculation).await?;
    let changes = provider.get_changes(&batch, None).await?;
    assert_eq!(changes.len(), 2);

    let cache = NavigationCache::new();
    let compiled = provider.compiled();
    let calculation = provider.calculation();
    for (entity, change) in changes {
        let original = compiled.original_value(&batch, &cache, entity).await?;
        let current = compiled.current_value(&batch, &cache, entity).await?;
        assert_eq!(calculation.apply_change(&original, &change)?, current);
        let recomputed = calculation.get_change(EvaluatedValues { original: Some(original), current: Some(current) })?;
        assert_eq!(recomputed, change);
    }
    assert_eq!(batch.state(alice), rollup_core::EntityState::Unchanged);
    assert_eq!(provider.current_value(&batch, bob).await?, Some(Value::I64(11)));
    Ok(())
}

/// Truncating operators cannot be applied to the related entities that changed only
#[tokio::test]
async fn test_integer_division_is_evaluated_in_full() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    for name in ["X", "Rex", "Tom"] {
        pet(&seed, alice, name, "Cat", 2)?;
    }
    seed.commit()?;

    let batch = store.batch()?;
    pet(&batch, alice, "Kit", "Cat", 2)?;

    let eager = Engine::new(engine.model().clone(), EngineConfig::eager());
    for expression in ["p => p.pets.count() / 2", "p => int(p.pets.sum(x => x.age) / 4.0)"] {
        let provider = engine.changes_provider("Person", expression, None, NumberDeltaCalculation).await?;
        assert!(!provider.is_incremental(), "{}", expression);
        let full = eager.changes_provider("Person", expression, None, NumberDeltaCalculation).await?;
        let changes = provider.get_changes(&batch, None).await?;
        assert_eq!(changes, full.get_changes(&batch, None).await?, "{}", expression);
        assert_eq!(changes, HashMap::from([(alice, int(1))]), "{}", expression);
    }

    // float division distributes over the pets that changed
    let halves = engine.changes_provider("Person", "p => p.pets.count() / 2.0", None, NumberDeltaCalculation).await?;
    assert!(halves.is_incremental());
    assert_eq!(halves.get_changes(&batch, None).await?, HashMap::from([(alice, Value::F64(0.5))]));
    Ok(())
}

#[tokio::test]
async fn test_values_missing_on_one_side() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    seed.commit()?;

    let batch = store.batch()?;
    let bob = person(&batch, "Bob")?;
    batch.remove(alice)?;

    let provider = engine.changes_provider("Person", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    let compiled = provider.compiled();
    let cache = NavigationCache::new();

    // an added entity has no original value
    match compiled.original_value(&batch, &cache, bob).await {
        Err(EvaluationError::InvalidState { entity, side }) => assert_eq!((entity, side), (bob, ValueSide::Original)),
        other => panic!("unexpected {:?}", other),
    }
    // a removed entity has no current value
    match compiled.current_value(&batch, &cache, alice).await {
        Err(EvaluationError::InvalidState { entity, side }) => assert_eq!((entity, side), (alice, ValueSide::Current)),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(compiled.original_value(&batch, &cache, alice).await?, int(0));
    assert_eq!(compiled.current_value(&batch, &cache, bob).await?, int(0));
    Ok(())
}
