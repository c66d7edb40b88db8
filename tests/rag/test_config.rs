// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Building the pipeline from configuration

use fabstir_rag_core::cache::{JsonFileCachePersistence, SemanticCache, SemanticCacheConfig};
use fabstir_rag_core::config::RagConfig;
use fabstir_rag_core::rag::{RagError, RagQueryOrchestrator, RetrievalSource};
use fabstir_rag_core::vector::{QueryVector, VectorBackend};
use std::sync::Arc;

#[test]
fn test_full_toml_document() {
    let config = RagConfig::from_toml_str(
        r#"
        [embedding]
        model_id = "nomic-ai/nomic-embed-text-v1.5"
        dimension = 768

        [reranker]
        prefer_accelerated = false
        top_k = 8

        [retrieval]
        candidate_limit = 40
        similarity_floor = 0.3

        [cache]
        similarity_threshold = 0.92
        max_entries_per_assistant = 200

        [context]
        include_scores = true

        [remote]
        api_key = "secret"
        timeout_ms = 2500

        [remote.backend]
        type = "real"
        api_url = "http://localhost:7530/api/v1"

        [ingest]
        invalidate_cache_on_ingest = true
        "#,
    )
    .unwrap();

    config.validate().unwrap();
    assert!(!config.reranker.prefer_accelerated);
    assert_eq!(config.reranker.top_k, 8);
    assert_eq!(config.retrieval.candidate_limit, 40);
    assert_eq!(config.cache.max_entries_per_assistant, 200);
    assert!(config.context.include_scores);
    assert_eq!(config.remote.api_key.as_deref(), Some("secret"));
    assert_eq!(
        config.remote.backend,
        VectorBackend::Real {
            api_url: "http://localhost:7530/api/v1".to_string()
        }
    );
    assert!(config.ingest.invalidate_cache_on_ingest);
}

#[test]
fn test_malformed_toml_is_config_error() {
    let err = RagConfig::from_toml_str("[retrieval\ncandidate_limit = ").unwrap_err();
    assert!(matches!(err, RagError::Config(_)));
}

#[tokio::test]
async fn test_from_config_defers_model_loading() {
    let orchestrator = RagQueryOrchestrator::from_config(&RagConfig::default(), None)
        .await
        .unwrap();

    assert!(!orchestrator.embedder().is_loaded().await);
    assert!(!orchestrator.reranker().is_loaded().await);
    assert!(orchestrator.retriever().strategy().remote().is_some());
    assert!(orchestrator.cache().is_empty().await);
}

#[tokio::test]
async fn test_from_config_rejects_bad_backend_url() {
    let mut config = RagConfig::default();
    config.remote.backend = VectorBackend::Real {
        api_url: "not a url".to_string(),
    };

    let result = RagQueryOrchestrator::from_config(&config, None).await;
    assert!(matches!(result, Err(RagError::Config(_))));
}

#[tokio::test]
async fn test_from_config_restores_persisted_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("semantic-cache.json");

    let seed = SemanticCache::new(SemanticCacheConfig::default())
        .unwrap()
        .with_persistence(Arc::new(JsonFileCachePersistence::new(&path)));
    seed.store(
        "a1",
        &QueryVector::normalized(vec![0.2, 0.9, 0.1]).unwrap(),
        "earlier question",
        vec![],
        RetrievalSource::Local,
    )
    .await
    .unwrap();
    seed.flush().await.unwrap();

    let mut config = RagConfig::default();
    config.cache.persistence_path = Some(path);
    let orchestrator = RagQueryOrchestrator::from_config(&config, None)
        .await
        .unwrap();

    assert_eq!(orchestrator.cache().len().await, 1);
    assert_eq!(
        orchestrator
            .cache()
            .stats()
            .await
            .entries_by_assistant
            .get("a1"),
        Some(&1)
    );
}
