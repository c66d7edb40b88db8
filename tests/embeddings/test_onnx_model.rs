// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX embedding model tests
//!
//! The real-model tests need nomic-embed-text-v1.5 exported to ONNX in
//! `RAG_TEST_EMBEDDING_DIR` (containing `onnx/model.onnx` and
//! `tokenizer.json`). Run them with `cargo test -- --ignored`.

use fabstir_rag_core::embeddings::{
    EmbeddingConfig, EmbeddingEngine, EmbeddingModel, EmbeddingRole, OnnxEmbeddingModel,
};
use fabstir_rag_core::models::{ModelSource, ProgressReporter};
use std::path::PathBuf;

fn model_dir() -> PathBuf {
    std::env::var("RAG_TEST_EMBEDDING_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/workspace/models/nomic-embed-text-v1.5"))
}

#[cfg(test)]
mod onnx_model_tests {
    use super::*;

    /// Missing files fail at construction with the offending path
    #[test]
    fn test_missing_files_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxEmbeddingModel::new(
            "missing",
            dir.path().join("model.onnx"),
            dir.path().join("tokenizer.json"),
            512,
        );

        let err = result.err().expect("load should fail");
        assert!(err.to_string().contains("tokenizer.json"));
    }

    /// A configured model directory is used as is, without the Hub
    #[test]
    fn test_local_source_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();

        let source = ModelSource {
            model_id: "local".to_string(),
            model_file: "model.onnx".to_string(),
            tokenizer_file: "tokenizer.json".to_string(),
            model_dir: Some(dir.path().to_path_buf()),
        };
        let err = source
            .resolve(&ProgressReporter::new("local", None))
            .err()
            .expect("model file is missing");
        assert!(err.to_string().contains("model.onnx"));
    }

    /// Real model: 768 dimensions, detected at load time
    #[test]
    #[ignore]
    fn test_real_model_dimension() {
        let dir = model_dir();
        let model = OnnxEmbeddingModel::new(
            "nomic-embed-text-v1.5",
            dir.join("onnx/model.onnx"),
            dir.join("tokenizer.json"),
            512,
        )
        .expect("Failed to load model");

        assert_eq!(model.dimension(), 768);
        let vectors = model
            .embed_batch(&["search_query: hello world".to_string()])
            .unwrap();
        assert_eq!(vectors[0].len(), 768);
    }

    /// Real model through the engine: related texts score higher than unrelated ones
    #[tokio::test]
    #[ignore]
    async fn test_real_model_semantic_ordering() {
        let config = EmbeddingConfig {
            model_dir: Some(model_dir()),
            ..Default::default()
        };
        let engine = EmbeddingEngine::onnx(config, None);

        let query = engine
            .embed("How do neural networks learn?", EmbeddingRole::Query)
            .await
            .unwrap();
        let related = engine
            .embed(
                "Neural networks are trained with gradient descent.",
                EmbeddingRole::Document,
            )
            .await
            .unwrap();
        let unrelated = engine
            .embed("Boil pasta in salted water.", EmbeddingRole::Document)
            .await
            .unwrap();

        assert!((query.norm() - 1.0).abs() < 1e-4);
        let related_score = query.similarity(&related).unwrap();
        let unrelated_score = query.similarity(&unrelated).unwrap();
        assert!(
            related_score > unrelated_score,
            "related {} <= unrelated {}",
            related_score,
            unrelated_score
        );
    }
}
