mod common;

use anyhow::Result;
use common::*;
use rollup_core::error::{ConfigurationError, UpdateError};
use rollup_core::{ComputedMember, CurrentValueCalculation, EngineConfig, NumberDeltaCalculation, SetDeltaCalculation, Value};

#[tokio::test]
async fn test_computed_property() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let pet_count = engine.computed_property("Person", "pet_count", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    let graph = engine.computed_graph(vec![Box::new(pet_count)])?;

    let batch = store.batch()?;
    let alice = person(&batch, "Alice")?;
    let bob = person(&batch, "Bob")?;
    pet(&batch, alice, "X", "Cat", 3)?;
    let rex = pet(&batch, alice, "Rex", "Dog", 5)?;
    let written = graph.update(&batch).await?;
    assert_eq!(written.len(), 1);
    assert_eq!(batch.get(alice, "pet_count")?, int(2));
    assert_eq!(batch.get(bob, "pet_count")?, int(0));
    batch.commit()?;

    let batch = store.batch()?;
    batch.set_reference(rex, "owner", Some(bob))?;
    pet(&batch, bob, "Tom", "Cat", 1)?;
    graph.update(&batch).await?;
    assert_eq!(batch.get(alice, "pet_count")?, int(1));
    assert_eq!(batch.get(bob, "pet_count")?, int(2));

    batch.commit()?;

    // nothing observed changed
    let batch = store.batch()?;
    batch.set(alice, "name", "Alicia")?;
    assert!(graph.update(&batch).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cascading_members() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let pet_score = engine.computed_property("Person", "pet_score", "p => p.pet_count * 10", None, NumberDeltaCalculation).await?;
    let pet_count = engine.computed_property("Person", "pet_count", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    let graph = engine.computed_graph(vec![Box::new(pet_score), Box::new(pet_count)])?;
    assert_eq!(graph.order(), vec!["Person.pet_count", "Person.pet_score"]);

    let batch = store.batch()?;
    let alice = person(&batch, "Alice")?;
    pet(&batch, alice, "X", "Cat", 3)?;
    pet(&batch, alice, "Rex", "Dog", 5)?;
    graph.update(&batch).await?;
    assert_eq!(batch.get(alice, "pet_score")?, int(20));
    batch.commit()?;

    let batch = store.batch()?;
    pet(&batch, alice, "Tom", "Cat", 1)?;
    let written = graph.update(&batch).await?;
    assert_eq!(written.len(), 2);
    assert_eq!(batch.get(alice, "pet_count")?, int(3));
    assert_eq!(batch.get(alice, "pet_score")?, int(30));
    Ok(())
}

#[tokio::test]
async fn test_cyclic_members() -> Result<()> {
    let (engine, _) = setup(EngineConfig::default());
    let pet_count = engine.computed_property("Person", "pet_count", "p => p.pet_score + 1", None, NumberDeltaCalculation).await?;
    let pet_score = engine.computed_property("Person", "pet_score", "p => p.pet_count + 1", None, NumberDeltaCalculation).await?;
    match engine.computed_graph(vec![Box::new(pet_count), Box::new(pet_score)]) {
        Err(ConfigurationError::CyclicDependency(path)) => assert_eq!(path, "Person.pet_count -> Person.pet_score -> Person.pet_count"),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("a cycle was accepted"),
    }

    let own = engine.computed_property("Person", "pet_count", "p => p.pets.count() + p.pet_count", None, NumberDeltaCalculation).await?;
    assert!(matches!(engine.computed_graph(vec![Box::new(own)]), Err(ConfigurationError::CyclicDependency(_))));
    Ok(())
}

#[tokio::test]
async fn test_consistency_and_fix() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let pet_count = engine.computed_property("Person", "pet_count", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    assert_eq!(pet_count.consistency_predicate().to_string(), "__e => (__e.pet_count == __e.pets.count())");

    let batch = store.batch()?;
    let alice = person(&batch, "Alice")?;
    let bob = person(&batch, "Bob")?;
    pet(&batch, alice, "X", "Cat", 3)?;
    pet_count.update(&batch, None).await?;
    batch.commit()?;

    let batch = store.batch()?;
    let report = pet_count.check_consistency(&batch, &[alice, bob]).await?;
    assert_eq!(report.checked, 2);
    assert!(report.is_consistent());

    batch.set(alice, "pet_count", 5)?;
    let report = pet_count.check_consistency(&batch, &[alice, bob]).await?;
    assert_eq!(report.inconsistent, vec![alice]);

    assert!(pet_count.fix(&batch, alice).await?);
    assert_eq!(batch.get(alice, "pet_count")?, int(1));
    assert!(!pet_count.fix(&batch, alice).await?);
    assert!(pet_count.check_consistency(&batch, &[alice, bob]).await?.is_consistent());

    // a tolerant comparer
    let at_least = pet_count.with_comparer("(stored, computed) => stored >= computed")?;
    batch.set(bob, "pet_count", 3)?;
    assert!(at_least.check_consistency(&batch, &[alice, bob]).await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn test_computed_navigation() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let cats = engine
        .computed_navigation("Person", "cats", "p => p.pets.where(x => x.kind == 'Cat')", None, SetDeltaCalculation, &["name"])
        .await?;
    let pet_count = engine.computed_property("Person", "pet_count", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    let graph = engine.computed_graph(vec![Box::new(cats), Box::new(pet_count)])?;

    let batch = store.batch()?;
    let alice = person(&batch, "Alice")?;
    let x = pet(&batch, alice, "X", "Cat", 3)?;
    let rex = pet(&batch, alice, "Rex", "Dog", 5)?;
    graph.update(&batch).await?;
    assert_eq!(batch.related(alice, "cats")?, vec![x]);
    batch.commit()?;

    let batch = store.batch()?;
    batch.set(rex, "kind", "Cat")?;
    graph.update(&batch).await?;
    let mut expected = vec![x, rex];
    expected.sort();
    assert_eq!(batch.related(alice, "cats")?, expected);

    let reports = graph.check_consistency(&batch, &[alice, x]).await?;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|(_, report)| report.checked == 1 && report.is_consistent()));

    // stored cats drift from the computed ones
    batch.remove_from(alice, "cats", x)?;
    let cats = graph.members().iter().find(|m| m.name() == "Person.cats").expect("cats");
    assert_eq!(cats.check_consistency(&batch, &[alice]).await?.inconsistent, vec![alice]);
    assert!(cats.fix(&batch, alice).await?);
    assert!(cats.check_consistency(&batch, &[alice]).await?.is_consistent());
    assert_eq!(batch.get(alice, "pet_count")?, Value::I64(2));
    Ok(())
}

#[tokio::test]
async fn test_collection_valued_property_consistency() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let pet_names = engine.computed_property("Person", "pet_names", "p => p.pets.select(x => x.name)", None, CurrentValueCalculation).await?;

    let batch = store.batch()?;
    let alice = person(&batch, "Alice")?;
    pet(&batch, alice, "X", "Cat", 3)?;
    pet(&batch, alice, "Rex", "Dog", 5)?;
    pet_names.update(&batch, None).await?;
    assert_eq!(batch.get(alice, "pet_names")?, Value::Set([Value::from("Rex"), Value::from("X")].into()));
    batch.commit()?;

    // the stored set matches the computed list
    let batch = store.batch()?;
    let report = pet_names.check_consistency(&batch, &[alice]).await?;
    assert_eq!(report.checked, 1);
    assert!(report.is_consistent());

    pet(&batch, alice, "Tom", "Cat", 1)?;
    assert_eq!(pet_names.check_consistency(&batch, &[alice]).await?.inconsistent, vec![alice]);
    assert!(pet_names.fix(&batch, alice).await?);
    assert!(pet_names.check_consistency(&batch, &[alice]).await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn test_round_limit() -> Result<()> {
    let (engine, store) = setup(EngineConfig::new(true, true, 1));
    let pet_count = engine.computed_property("Person", "pet_count", "p => p.pets.count()", None, NumberDeltaCalculation).await?;
    let graph = engine.computed_graph(vec![Box::new(pet_count)])?;

    // settling takes a second round that writes nothing
    let batch = store.batch()?;
    let alice = person(&batch, "Alice")?;
    pet(&batch, alice, "X", "Cat", 3)?;
    assert!(matches!(graph.update(&batch).await, Err(UpdateError::RoundLimit(1))));

    // a batch with nothing to write settles in its first round
    let batch = store.batch()?;
    assert!(graph.update(&batch).await?.is_empty());
    Ok(())
}
