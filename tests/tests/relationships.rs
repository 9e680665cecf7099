mod common;
use std::collections::HashMap;

use anyhow::Result;
use common::*;
use rollup_core::model::ObservedMember;
use rollup_core::{Changeset, Engine, EngineConfig, NumberDeltaCalculation, Value, ValueChange, ValueChangeCalculation, VoidCalculation};

#[tokio::test]
async fn test_friendship_from_either_side() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    seed.commit()?;

    let friends = engine.changes_provider("Person", "p => p.friends.count()", None, NumberDeltaCalculation).await?;
    let friend_of = engine.changes_provider("Person", "p => p.friend_of.count()", None, NumberDeltaCalculation).await?;

    let forward = store.batch()?;
    forward.add_to(alice, "friends", bob)?;
    let inverse = store.batch()?;
    inverse.add_to(bob, "friend_of", alice)?;

    for batch in [&forward, &inverse] {
        assert_eq!(batch.related(alice, "friends")?, vec![bob]);
        assert_eq!(friends.get_changes(batch, None).await?, HashMap::from([(alice, int(1))]));
        assert_eq!(friend_of.get_changes(batch, None).await?, HashMap::from([(bob, int(1))]));
    }

    forward.commit()?;
    let batch = store.batch()?;
    batch.remove_from(bob, "friend_of", alice)?;
    assert_eq!(friends.get_changes(&batch, None).await?, HashMap::from([(alice, int(-1))]));
    Ok(())
}

#[tokio::test]
async fn test_membership_only() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    let rex = pet(&seed, alice, "Rex", "Dog", 5)?;
    seed.commit()?;

    let batch = store.batch()?;
    batch.set(rex, "age", 6)?;
    batch.add_to(bob, "friends", alice)?;

    // a void calculation reports which entities are affected, whatever the values
    let provider = engine.changes_provider("Person", "p => p.pets.sum(x => x.age) + p.friends.count()", None, VoidCalculation).await?;
    let changes = provider.get_changes(&batch, None).await?;
    assert_eq!(changes, HashMap::from([(alice, ()), (bob, ())]));
    Ok(())
}

/// Changes made on top of a batch are the same whether they are isolated with `delta_from` or
/// captured from a batch containing only them
#[tokio::test]
async fn test_delta_from() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let model = engine.model().clone();
    let observed = [
        ObservedMember::Property(member(&model, "Pet", "kind")),
        ObservedMember::Property(member(&model, "Pet", "age")),
        ObservedMember::Navigation(member(&model, "Person", "pets")),
    ];

    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    let x = pet(&seed, alice, "X", "Cat", 3)?;
    seed.commit()?;

    let first = |batch: &rollup_core::storage::Batch| -> Result<()> {
        batch.set(x, "kind", "Dog")?;
        Ok(())
    };
    let second = |batch: &rollup_core::storage::Batch| -> Result<()> {
        batch.set(x, "age", 7)?;
        batch.set_reference(x, "owner", Some(bob))?;
        Ok(())
    };

    let batch = store.batch()?;
    first(&batch)?;
    let after_first = Changeset::capture(&batch, &observed).await?;
    second(&batch)?;
    let after_both = Changeset::capture(&batch, &observed).await?;
    let delta = after_both.delta_from(&after_first);
    drop(batch);

    let batch = store.batch()?;
    first(&batch)?;
    batch.commit()?;
    let batch = store.batch()?;
    second(&batch)?;
    let isolated = Changeset::capture(&batch, &observed).await?;

    assert_eq!(delta.keys(), isolated.keys());
    for (member, entity) in isolated.keys() {
        assert_eq!(delta.get(member, entity), isolated.get(member, entity));
    }
    assert_eq!(delta.len(), 2);
    Ok(())
}

fn names(names: &[&str]) -> Value { Value::Set(names.iter().map(|n| Value::from(*n)).collect()) }

#[tokio::test]
async fn test_distinct_elements() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    pet(&seed, alice, "X", "Cat", 3)?;
    let rex = pet(&seed, alice, "Rex", "Dog", 5)?;
    pet(&seed, bob, "Tom", "Cat", 2)?;
    seed.commit()?;

    let batch = store.batch()?;
    batch.set(rex, "kind", "Cat")?;
    let provider = engine.changes_provider("Person", "p => p.pets.distinct().count(x => x.kind == 'Cat')", None, ValueChangeCalculation).await?;
    assert_eq!(provider.get_changes(&batch, None).await?, HashMap::from([(alice, ValueChange { original: int(1), current: int(2) })]));
    Ok(())
}

/// Entities reached from a group key or a dictionary value still lead back to the root entity
#[tokio::test]
async fn test_group_keys_and_dictionary_values() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    pet(&seed, alice, "X", "Cat", 3)?;
    pet(&seed, alice, "Rex", "Dog", 5)?;
    seed.commit()?;

    let batch = store.batch()?;
    batch.set(alice, "name", "Alicia")?;
    // bob owns no pets, his name is never read
    batch.set(bob, "name", "Robert")?;
    let renamed = HashMap::from([(alice, ValueChange { original: names(&["Alice"]), current: names(&["Alicia"]) })]);

    let keys = engine.changes_provider("Person", "p => p.pets.group_by(x => x.owner).select(g => g.key.name)", None, ValueChangeCalculation).await?;
    assert_eq!(keys.get_changes(&batch, None).await?, renamed);

    let values =
        engine.changes_provider("Person", "p => p.pets.to_dictionary(x => x.name, x => x.owner).select(e => e.value.name)", None, ValueChangeCalculation).await?;
    assert_eq!(values.get_changes(&batch, None).await?, renamed);

    // group sizes follow the kinds of the pets
    let batch = store.batch()?;
    pet(&batch, alice, "Tom", "Bird", 1)?;
    let kinds = engine.changes_provider("Person", "p => p.pets.group_by(x => x.kind).count()", None, NumberDeltaCalculation).await?;
    assert_eq!(kinds.get_changes(&batch, None).await?, HashMap::from([(alice, int(1))]));
    Ok(())
}

#[tokio::test]
async fn test_conditional_on_a_collection() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let bob = person(&seed, "Bob")?;
    pet(&seed, alice, "X", "Cat", 3)?;
    let rex = pet(&seed, alice, "Rex", "Dog", 5)?;
    let tom = pet(&seed, bob, "Tom", "Cat", 2)?;
    seed.commit()?;

    let batch = store.batch()?;
    batch.set(rex, "kind", "Cat")?;
    batch.set(tom, "kind", "Dog")?;

    let expression = "p => p.pets.any(x => x.kind == 'Dog') ? p.pets.count() : 0";
    let provider = engine.changes_provider("Person", expression, None, NumberDeltaCalculation).await?;
    assert!(!provider.compiled().is_partial());
    let changes = provider.get_changes(&batch, None).await?;
    assert_eq!(changes, HashMap::from([(alice, int(-2)), (bob, int(1))]));

    let eager = Engine::new(engine.model().clone(), EngineConfig::eager());
    let full = eager.changes_provider("Person", expression, None, NumberDeltaCalculation).await?;
    assert_eq!(full.get_changes(&batch, None).await?, changes);
    Ok(())
}

#[tokio::test]
async fn test_untracked_reads() -> Result<()> {
    let (engine, store) = setup(EngineConfig::default());
    let seed = store.batch()?;
    let alice = person(&seed, "Alice")?;
    let x = pet(&seed, alice, "X", "Cat", 3)?;
    seed.commit()?;

    let provider = engine.changes_provider("Person", "p => p.pets.count() + untracked(p.pets).sum(x => x.age)", None, NumberDeltaCalculation).await?;

    // ages are only read untracked
    let batch = store.batch()?;
    batch.set(x, "age", 10)?;
    assert!(provider.get_changes(&batch, None).await?.is_empty());

    // a tracked change re-reads them in full: from 1 + 3 to 2 + 7
    let batch = store.batch()?;
    pet(&batch, alice, "Kit", "Dog", 4)?;
    assert_eq!(provider.get_changes(&batch, None).await?, HashMap::from([(alice, int(5))]));
    Ok(())
}
