// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Load-once semantics of the embedding engine

use crate::common::{test_embedding_config, CountingEmbeddingLoader, CATS};
use fabstir_rag_core::embeddings::{EmbeddingEngine, EmbeddingRole};
use fabstir_rag_core::models::{LoadProgress, LoadStage, ProgressCallback};
use fabstir_rag_core::rag::{ModelError, RagError};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn slow_engine(delay_ms: u64) -> (Arc<EmbeddingEngine>, Arc<CountingEmbeddingLoader>) {
    let loader = Arc::new(CountingEmbeddingLoader::slow(Duration::from_millis(delay_ms)));
    let engine = EmbeddingEngine::new(test_embedding_config(), loader.clone(), None);
    (Arc::new(engine), loader)
}

#[tokio::test]
async fn test_concurrent_first_calls_share_one_load() {
    let (engine, loader) = slow_engine(100);

    let calls = (0..10).map(|i| {
        let engine = engine.clone();
        async move {
            engine
                .embed(&format!("{} #{}", CATS, i), EmbeddingRole::Query)
                .await
        }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(loader.calls(), 1);
    assert!(engine.is_loaded().await);
}

#[tokio::test]
async fn test_concurrent_calls_across_tasks_share_one_load() {
    let (engine, loader) = slow_engine(50);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.ensure_loaded().await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_load() {
    let (engine, loader) = slow_engine(100);

    let impatient = tokio::time::timeout(
        Duration::from_millis(10),
        engine.embed(CATS, EmbeddingRole::Query),
    )
    .await;
    assert!(impatient.is_err(), "caller should have timed out");

    engine.embed(CATS, EmbeddingRole::Query).await.unwrap();
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_failed_load_is_shared_and_sticky() {
    let loader = Arc::new(CountingEmbeddingLoader::failing("weights corrupted"));
    let engine = Arc::new(EmbeddingEngine::new(
        test_embedding_config(),
        loader.clone(),
        None,
    ));

    let (first, second) = tokio::join!(
        engine.embed(CATS, EmbeddingRole::Query),
        engine.embed(CATS, EmbeddingRole::Query)
    );
    let third = engine.embed(CATS, EmbeddingRole::Query).await;

    for result in [first, second, third] {
        match result {
            Err(err @ RagError::EmbeddingModel(ModelError::LoadFailed { .. })) => {
                assert!(err.is_fatal());
                assert!(err.to_string().contains("weights corrupted"));
            }
            other => panic!("expected load failure, got {:?}", other),
        }
    }
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_progress_milestones_in_order() {
    let seen: Arc<Mutex<Vec<LoadStage>>> = Arc::new(Mutex::new(Vec::new()));
    let callback: ProgressCallback = {
        let seen = seen.clone();
        Arc::new(move |progress: &LoadProgress| seen.lock().unwrap().push(progress.stage))
    };
    let engine = EmbeddingEngine::new(
        test_embedding_config(),
        Arc::new(CountingEmbeddingLoader::new()),
        Some(callback),
    );
    let mut receiver = engine.subscribe_progress();

    engine.ensure_loaded().await.unwrap();

    let stages = seen.lock().unwrap().clone();
    assert_eq!(
        stages,
        vec![LoadStage::Initiated, LoadStage::Loading, LoadStage::Ready]
    );
    let latest = receiver.borrow_and_update().clone().unwrap();
    assert_eq!(latest.stage, LoadStage::Ready);
    assert_eq!(latest.fraction, 1.0);
    assert_eq!(latest.model_name, "test/keyword-embedder");
}

#[tokio::test]
async fn test_failed_load_reports_failed_stage() {
    let seen: Arc<Mutex<Vec<LoadStage>>> = Arc::new(Mutex::new(Vec::new()));
    let callback: ProgressCallback = {
        let seen = seen.clone();
        Arc::new(move |progress: &LoadProgress| seen.lock().unwrap().push(progress.stage))
    };
    let engine = EmbeddingEngine::new(
        test_embedding_config(),
        Arc::new(CountingEmbeddingLoader::failing("no such file")),
        Some(callback),
    );

    assert!(engine.ensure_loaded().await.is_err());
    assert_eq!(seen.lock().unwrap().last(), Some(&LoadStage::Failed));
}
