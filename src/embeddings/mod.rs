// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Text embedding
//!
//! [`EmbeddingEngine`] owns one lazily loaded [`EmbeddingModel`] and turns
//! query or document text into normalized [`QueryVector`](crate::vector::QueryVector)s.

pub mod engine;
pub mod onnx_model;

pub use engine::{
    EmbeddingConfig, EmbeddingEngine, EmbeddingModelLoader, EmbeddingRole, OnnxEmbeddingLoader,
};
pub use onnx_model::OnnxEmbeddingModel;

/// A loaded sentence embedding model
///
/// Inference is synchronous and CPU/GPU bound; the engine calls it from
/// `spawn_blocking`. Returned vectors need not be normalized.
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// One vector per input text, in input order
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}
