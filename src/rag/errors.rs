// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for the retrieval pipeline
//!
//! Errors fall into three groups:
//! - Fatal: embedding model load failure, reranker failure on every execution path
//! - Absorbed: remote backend failures (the retriever degrades to the local store)
//! - Recoverable: cache failures (the orchestrator proceeds as a miss and logs)
//!
//! Only [`RagError`] values reach the caller of a query.

use thiserror::Error;

use crate::vector::VectorError;

/// Failures from the model runtime (loading or inference)
///
/// `Clone` so a single failed initialization can be handed to every caller
/// that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Model could not be loaded
    #[error("Failed to load model {model}: {reason}")]
    LoadFailed { model: String, reason: String },

    /// Every execution path failed to initialize
    #[error(
        "Failed to load model {model} on any execution path (accelerated: {accelerated}; cpu: {cpu})"
    )]
    AllExecutionPathsFailed {
        model: String,
        accelerated: String,
        cpu: String,
    },

    /// Forward pass failed after the model was loaded
    #[error("Inference failed for model {model}: {reason}")]
    Inference { model: String, reason: String },

    /// Loader task panicked or was aborted
    #[error("Loader task for model {model} aborted: {reason}")]
    LoaderAborted { model: String, reason: String },
}

impl ModelError {
    /// Name of the model the error refers to
    pub fn model(&self) -> &str {
        match self {
            ModelError::LoadFailed { model, .. }
            | ModelError::AllExecutionPathsFailed { model, .. }
            | ModelError::Inference { model, .. }
            | ModelError::LoaderAborted { model, .. } => model,
        }
    }
}

/// Errors surfaced to the caller of the pipeline
#[derive(Error, Debug)]
pub enum RagError {
    /// Input text is empty after trimming
    #[error("Input text must not be empty")]
    EmptyInput,

    /// Embedding model failed to load or run
    #[error("Embedding failed: {0}")]
    EmbeddingModel(ModelError),

    /// Cross-encoder failed to load or run
    #[error("Reranking failed: {0}")]
    RerankModel(ModelError),

    /// A vector violated the shared format
    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagError {
    /// Get error code for logging and metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            RagError::EmptyInput => "EMPTY_INPUT",
            RagError::EmbeddingModel(ModelError::Inference { .. }) => "EMBEDDING_INFERENCE_FAILED",
            RagError::EmbeddingModel(_) => "EMBEDDING_MODEL_UNAVAILABLE",
            RagError::RerankModel(ModelError::Inference { .. }) => "RERANK_INFERENCE_FAILED",
            RagError::RerankModel(_) => "RERANK_MODEL_UNAVAILABLE",
            RagError::Vector(_) => "INVALID_VECTOR",
            RagError::Config(_) => "INVALID_CONFIG",
        }
    }

    /// Whether this error means the model behind the pipeline is unusable
    ///
    /// A failed load is never retried by the same engine; a fresh engine is
    /// needed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingModel(
                ModelError::LoadFailed { .. } | ModelError::LoaderAborted { .. }
            ) | RagError::RerankModel(
                ModelError::AllExecutionPathsFailed { .. }
                    | ModelError::LoadFailed { .. }
                    | ModelError::LoaderAborted { .. }
            )
        )
    }

    /// Get user-friendly error message for the chat flow
    pub fn user_message(&self) -> String {
        match self {
            RagError::EmptyInput => "Please enter a question".to_string(),
            RagError::EmbeddingModel(_) => {
                "The knowledge base is unavailable: the embedding model could not be used"
                    .to_string()
            }
            RagError::RerankModel(_) => {
                "The knowledge base is unavailable: the ranking model could not be used"
                    .to_string()
            }
            _ => self.to_string(),
        }
    }
}
