// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Accelerated-then-CPU loading of the cross-encoder

use crate::common::{test_reranker, test_reranker_config, ScriptedCrossEncoderLoader, CATS};
use fabstir_rag_core::models::ExecutionPath;
use fabstir_rag_core::rag::{ModelError, Passage, RagError};
use fabstir_rag_core::rerank::{Reranker, RerankerConfig};
use std::sync::Arc;

fn one_candidate() -> Vec<Passage> {
    vec![Passage::new("cats", CATS).with_similarity(0.8)]
}

#[tokio::test]
async fn test_accelerated_path_preferred() {
    let loader = Arc::new(ScriptedCrossEncoderLoader::working());
    let reranker = test_reranker(loader.clone());

    reranker.ensure_loaded().await.unwrap();
    assert_eq!(loader.attempts(), vec![ExecutionPath::Accelerated]);
    assert_eq!(
        reranker.execution_path().await,
        Some(ExecutionPath::Accelerated)
    );
}

#[tokio::test]
async fn test_falls_back_to_cpu() {
    let loader = Arc::new(ScriptedCrossEncoderLoader::without_accelerator());
    let reranker = test_reranker(loader.clone());

    let ranked = reranker.rerank("kitten", one_candidate(), 1).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(
        loader.attempts(),
        vec![ExecutionPath::Accelerated, ExecutionPath::Cpu]
    );
    assert_eq!(reranker.execution_path().await, Some(ExecutionPath::Cpu));
}

#[tokio::test]
async fn test_both_paths_failing_is_one_combined_error() {
    let loader = Arc::new(ScriptedCrossEncoderLoader::broken());
    let reranker = test_reranker(loader.clone());

    let err = reranker
        .rerank("kitten", one_candidate(), 1)
        .await
        .unwrap_err();

    match &err {
        RagError::RerankModel(ModelError::AllExecutionPathsFailed {
            accelerated, cpu, ..
        }) => {
            assert!(accelerated.contains("accelerated"), "{}", accelerated);
            assert!(cpu.contains("cpu"), "{}", cpu);
        }
        other => panic!("expected combined failure, got {:?}", other),
    }
    assert!(err.is_fatal());

    // Sticky: no second round of attempts
    assert!(reranker.rerank("kitten", one_candidate(), 1).await.is_err());
    assert_eq!(loader.attempts().len(), 2);
}

#[tokio::test]
async fn test_cpu_only_configuration() {
    let loader = Arc::new(ScriptedCrossEncoderLoader::broken());
    let config = RerankerConfig {
        prefer_accelerated: false,
        ..test_reranker_config()
    };
    let reranker = Reranker::new(&config, loader.clone(), None);

    let err = reranker.ensure_loaded().await.unwrap_err();
    assert!(matches!(
        err,
        RagError::RerankModel(ModelError::LoadFailed { .. })
    ));
    assert_eq!(loader.attempts(), vec![ExecutionPath::Cpu]);
}
