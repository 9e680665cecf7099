mod common;
use std::collections::HashMap;

use anyhow::Result;
use common::*;
use rollup_core::{ChangeMemory, EngineConfig, NumberDeltaCalculation, SetChange, SetDeltaCalculation, Value};

/// Repeated calls on a batch that keeps changing only report what changed since the previous call
#[tokio::test]
async fn test_rounds_report_new_changes_only() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    pet(&seed, alice, "X", "Cat", 3)?;
    seed.commit()?;

    let provider = engine.changes_provider("Person", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    let mut memory = ChangeMemory::new();
    assert!(memory.is_empty());

    let batch = store.batch()?;
    let y = pet(&batch, alice, "Y", "Cat", 1)?;
    assert_eq!(provider.get_changes(&batch, Some(&mut memory)).await?, HashMap::from([(alice, int(1))]));
    assert!(provider.get_changes(&batch, Some(&mut memory)).await?.is_empty());

    pet(&batch, alice, "Z", "Dog", 2)?;
    pet(&batch, bob, "W", "Dog", 4)?;
    assert_eq!(provider.get_changes(&batch, Some(&mut memory)).await?, HashMap::from([(alice, int(1)), (bob, int(1))]));

    // undoing part of the batch retracts what was reported for it
    batch.remove(y)?;
    assert_eq!(provider.get_changes(&batch, Some(&mut memory)).await?, HashMap::from([(alice, int(-1))]));
    assert_eq!(memory.reported().get(&alice), Some(&int(1)));
    assert_eq!(memory.reported().get(&bob), Some(&int(1)));

    // without a memory the whole batch is reported
    assert_eq!(provider.get_changes(&batch, None).await?, HashMap::from([(alice, int(1)), (bob, int(1))]));
    Ok(())
}

#[tokio::test]
async fn test_set_rounds() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let x = pet(&seed, alice, "X", "Cat", 3)?;
    let rex = pet(&seed, alice, "Rex", "Dog", 5)?;
    seed.commit()?;

    let provider = engine.changes_provider("Person", "p => p.pets.where(x => x.kind == 'Cat').select(x => x.name)", None, SetDeltaCalculation).await?;
    // a partial set cannot tell whether a removed name is still present on another pet
    assert!(!provider.is_incremental());

    let mut memory = ChangeMemory::new();
    let batch = store.batch()?;
    batch.set(rex, "kind", "Cat")?;
    let expected = SetChange { added: [Value::from("Rex")].into(), removed: Default::default() };
    assert_eq!(provider.get_changes(&batch, Some(&mut memory)).await?, HashMap::from([(alice, expected)]));

    batch.set(x, "kind", "Dog")?;
    batch.set(rex, "kind", "Dog")?;
    let expected = SetChange { added: Default::default(), removed: [Value::from("Rex"), Value::from("X")].into() };
    assert_eq!(provider.get_changes(&batch, Some(&mut memory)).await?, HashMap::from([(alice, expected)]));
    Ok(())
}
