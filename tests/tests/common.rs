#![allow(unused)]
use std::sync::Arc;

use tracing::Level;

use rollup_core::model::{Cardinality, MemberId, Model};
use rollup_core::storage::{Batch, MemoryStore};
use rollup_core::{Engine, EngineConfig, Entity, Value};

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init(); }

/// People owning pets, befriending each other, plus the members computed from those
pub fn model() -> Arc<Model> {
    let mut builder = Model::builder();
    let person = builder.entity("Person");
    let pet = builder.entity("Pet");

    builder.property(person, "name");
    builder.property(person, "active");
    builder.property(person, "pet_count");
    builder.property(person, "pet_score");
    builder.property(person, "friend_count");
    builder.property(person, "pet_names");
    builder.property(pet, "name");
    builder.property(pet, "kind");
    builder.property(pet, "age");

    builder.relationship(person, "pets", Cardinality::Many, pet, "owner", Cardinality::One);
    builder.relationship(person, "friends", Cardinality::Many, person, "friend_of", Cardinality::Many);
    // stored result of a computed navigation
    builder.navigation(person, "cats", Cardinality::Many, pet);
    Arc::new(builder.build())
}

pub fn setup(config: EngineConfig) -> (Engine, Arc<MemoryStore>) {
    let model = model();
    (Engine::new(model.clone(), config), MemoryStore::new(model))
}

pub fn member(model: &Model, entity_type: &str, name: &str) -> MemberId {
    let ty = model.entity_type(entity_type).expect("entity type").id;
    model.member_by_name(ty, name).expect("member").id
}

pub fn person(batch: &Batch, name: &str) -> anyhow::Result<Entity> {
    let person = batch.create("Person")?;
    batch.set(person, "name", name)?;
    batch.set(person, "active", true)?;
    // counters are non-nullable and start at zero
    for counter in ["pet_count", "pet_score", "friend_count"] {
        batch.set(person, counter, 0)?;
    }
    Ok(person)
}

pub fn pet(batch: &Batch, owner: Entity, name: &str, kind: &str, age: i64) -> anyhow::Result<Entity> {
    let pet = batch.create("Pet")?;
    batch.set(pet, "name", name)?;
    batch.set(pet, "kind", kind)?;
    batch.set(pet, "age", age)?;
    batch.set_reference(pet, "owner", Some(owner))?;
    Ok(pet)
}

pub fn int(value: i64) -> Value { Value::I64(value) }
