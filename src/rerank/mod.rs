// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cross-encoder re-ranking of retrieval candidates

pub mod cross_encoder;
pub mod reranker;

pub use cross_encoder::OnnxCrossEncoder;
pub use reranker::{
    pass_through, sigmoid, CrossEncoderLoader, OnnxCrossEncoderLoader, Reranker, RerankerConfig,
};

use crate::models::ExecutionPath;

/// A loaded cross-encoder
pub trait CrossEncoderModel: Send + Sync {
    fn model_name(&self) -> &str;

    fn execution_path(&self) -> ExecutionPath;

    /// Raw relevance logit for each `(query, passage)` pair, in input order
    ///
    /// `None` where the model produced no usable score.
    fn score_pairs(&self, query: &str, passages: &[String]) -> anyhow::Result<Vec<Option<f32>>>;
}
