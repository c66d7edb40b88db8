// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Remote-then-local retrieval

use crate::common::{
    ErroringBackend, HangingBackend, KeywordEmbeddingModel, RecordingBackend, CATS, NEURAL, PASTA,
};
use fabstir_rag_core::rag::{Passage, RetrievalSource};
use fabstir_rag_core::vector::{
    InMemoryVectorBackend, LocalPassageStore, QueryVector, RemoteThenLocal, RemoteVectorBackend,
    RetrievalConfig, RetrievalOutcome, VectorRetriever,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn query(text: &str) -> QueryVector {
    QueryVector::normalized(KeywordEmbeddingModel::vector(text)).unwrap()
}

async fn local_with_corpus(assistant_id: &str) -> Arc<LocalPassageStore> {
    let local = Arc::new(LocalPassageStore::new());
    for (id, text) in [("cats", CATS), ("pasta", PASTA), ("neural", NEURAL)] {
        local
            .insert(
                assistant_id,
                Passage::new(id, text).with_vector(KeywordEmbeddingModel::vector(text)),
            )
            .await
            .unwrap();
    }
    local
}

fn retriever(
    remote: Option<Arc<dyn RemoteVectorBackend>>,
    local: Arc<LocalPassageStore>,
    config: RetrievalConfig,
) -> VectorRetriever {
    VectorRetriever::new(RemoteThenLocal::new(remote, local), config)
}

#[tokio::test]
async fn test_remote_rows_take_priority() {
    let remote = Arc::new(RecordingBackend::new());
    remote.add("a1", "remote-neural", NEURAL);
    let local = local_with_corpus("a1").await;

    let retriever = retriever(Some(remote.clone()), local, RetrievalConfig::default());
    let result = retriever.retrieve("a1", &query("neural networks"), 5).await;

    assert_eq!(result.source, RetrievalSource::Remote);
    assert_eq!(result.passages.len(), 1);
    assert_eq!(result.passages[0].source_id, "remote-neural");
    assert_eq!(remote.searches(), 1);
}

#[tokio::test]
async fn test_empty_remote_falls_back_to_local() {
    let remote = Arc::new(RecordingBackend::new());
    let local = local_with_corpus("a1").await;

    let retriever = retriever(Some(remote.clone()), local, RetrievalConfig::default());
    let result = retriever.retrieve("a1", &query("machine learning"), 5).await;

    assert_eq!(result.source, RetrievalSource::Local);
    assert_eq!(result.passages[0].source_id, "neural");
    assert_eq!(remote.searches(), 1);
}

#[tokio::test]
async fn test_erroring_remote_and_empty_local_is_empty() {
    let retriever = retriever(
        Some(Arc::new(ErroringBackend)),
        Arc::new(LocalPassageStore::new()),
        RetrievalConfig::default(),
    );

    let result = retriever.retrieve("a1", &query("anything at all"), 5).await;
    assert_eq!(result.source, RetrievalSource::Empty);
    assert!(result.passages.is_empty());
    assert_eq!(result.candidate_count, 0);
}

#[tokio::test]
async fn test_erroring_remote_uses_local() {
    let retriever = retriever(
        Some(Arc::new(ErroringBackend)),
        local_with_corpus("a1").await,
        RetrievalConfig::default(),
    );

    let result = retriever.retrieve("a1", &query("kittens"), 5).await;
    assert_eq!(result.source, RetrievalSource::Local);
    assert_eq!(result.passages[0].source_id, "cats");
}

#[tokio::test]
async fn test_remote_timeout_falls_back_to_local() {
    let config = RetrievalConfig {
        remote_timeout_ms: 50,
        ..Default::default()
    };
    let retriever = retriever(
        Some(Arc::new(HangingBackend)),
        local_with_corpus("a1").await,
        config,
    );

    let started = Instant::now();
    let result = retriever.retrieve("a1", &query("spaghetti"), 5).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.source, RetrievalSource::Local);
    assert_eq!(result.passages[0].source_id, "pasta");
}

#[tokio::test]
async fn test_floor_filters_but_keeps_source() {
    let local = local_with_corpus("a1").await;
    let retriever = retriever(None, local, RetrievalConfig::default());

    let result = retriever.retrieve("a1", &query("kittens"), 5).await;
    assert_eq!(result.source, RetrievalSource::Local);
    assert_eq!(result.candidate_count, 3);
    assert_eq!(result.filtered_count, 1);
    assert!(result
        .passages
        .iter()
        .all(|p| p.similarity.unwrap() >= 0.35));

    // Nothing above a strict floor: still tagged with the producing backend
    retriever
        .update_config(RetrievalConfig {
            similarity_floor: 1.0,
            ..Default::default()
        })
        .await;
    let result = retriever.retrieve("a1", &query("weather"), 5).await;
    assert_eq!(result.source, RetrievalSource::Local);
    assert!(result.passages.is_empty());
}

#[tokio::test]
async fn test_results_are_sorted_and_bounded() {
    let local = local_with_corpus("a1").await;
    let retriever = retriever(
        None,
        local,
        RetrievalConfig {
            similarity_floor: -1.0,
            ..Default::default()
        },
    );

    let result = retriever.retrieve("a1", &query("cats and pasta"), 2).await;
    assert_eq!(result.passages.len(), 2);
    let scores: Vec<f32> = result.passages.iter().map(|p| p.similarity.unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_zero_top_k_is_empty() {
    let remote = Arc::new(RecordingBackend::new());
    let retriever = retriever(
        Some(remote.clone()),
        local_with_corpus("a1").await,
        RetrievalConfig::default(),
    );

    let outcome = retriever
        .retrieve_candidates("a1", &query("cats"), 0)
        .await;
    assert_eq!(outcome, RetrievalOutcome::Empty);
    assert_eq!(remote.searches(), 0);
}

#[tokio::test]
async fn test_in_memory_backend_round_trip() {
    let backend = InMemoryVectorBackend::new();
    let vector = query(NEURAL);
    backend
        .upsert_vector("neural", "a1", NEURAL, &vector)
        .await
        .unwrap();
    backend
        .upsert_vector("neural", "a1", "replaced", &vector)
        .await
        .unwrap();
    assert_eq!(backend.count("a1").await, 1);

    let matches = backend.search("a1", &vector, 3).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].text, "replaced");
    assert!((matches[0].similarity - 1.0).abs() < 1e-5);
    assert!(backend.search("a2", &vector, 3).await.unwrap().is_empty());
}
