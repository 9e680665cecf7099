mod common;
use std::sync::Arc;

use anyhow::Result;
use common::*;
use rollup_core::{Engine, EngineConfig, NumberDeltaCalculation};

/// Tasks asking for the same expression at once share a single compilation
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_compilation() -> Result<()> {
    let engine = Arc::new(Engine::new(model(), EngineConfig::default()));

    let handles = (0..8).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.compile("Person", "p => p.pets.count()", None).await })
    });
    let compiled = futures::future::try_join_all(handles).await?.into_iter().collect::<Result<Vec<_>, _>>()?;

    assert_eq!(compiled.len(), 8);
    assert!(compiled.iter().all(|c| Arc::ptr_eq(c, &compiled[0])));
    assert_eq!(engine.compilation_count(), 1);

    // differently spelled, same canonical form
    engine.compile("Person", "p=>p.pets.count( )", None).await?;
    assert_eq!(engine.compilation_count(), 1);

    // a filter makes it a different expression
    engine.compile("Person", "p => p.pets.count()", Some("p => p.active == true")).await?;
    assert_eq!(engine.compilation_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_providers_share_compilations() -> Result<()> {
    let config = EngineConfig::from_json(r#"{"incremental": false}"#)?;
    let engine = Engine::new(model(), config);
    let first = engine.changes_provider("Person", "p => p.pets.sum(x => x.age)", None, NumberDeltaCalculation).await?;
    let second = engine.changes_provider("Person", "p => p.pets.sum(x => x.age)", None, NumberDeltaCalculation).await?;
    assert!(std::ptr::eq(first.compiled(), second.compiled()));
    assert!(!first.is_incremental());
    assert_eq!(engine.compilation_count(), 1);
    Ok(())
}
