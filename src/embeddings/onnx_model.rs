// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX Embedding Model Wrapper
//!
//! Wraps ONNX Runtime to run a sentence-transformer encoder (by default
//! nomic-embed-text-v1.5, 768 dimensions).
//!
//! Features:
//! - ONNX model loading from disk
//! - GPU acceleration via CUDA (with automatic CPU fallback)
//! - BERT tokenization with truncation to `max_length`
//! - Batched inference with attention-masked mean pooling
//!
//! Output vectors are mean-pooled but NOT normalized here; the
//! [`EmbeddingEngine`](super::EmbeddingEngine) normalizes every vector it
//! hands out.

use anyhow::{Context, Result};
use ndarray::{ArrayD, Axis, Ix3};
use ort::session::Session;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use super::EmbeddingModel;
use crate::models::onnx::{build_session_with_fallback, run_batch, EncodedBatch};
use crate::models::ExecutionPath;

/// ONNX-based sentence embedding model
///
/// # Thread Safety
/// The session sits behind a `Mutex` because inference needs `&mut Session`;
/// everything else is immutable after construction.
#[derive(Clone)]
pub struct OnnxEmbeddingModel {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    model_name: String,
    dimension: usize,
    max_length: usize,
    execution_path: ExecutionPath,
}

impl std::fmt::Debug for OnnxEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingModel")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("max_length", &self.max_length)
            .field("execution_path", &self.execution_path)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingModel {
    /// Loads the model and tokenizer from disk
    ///
    /// Runs one validation inference to learn the hidden dimension. Blocking:
    /// call from `spawn_blocking`.
    ///
    /// # Errors
    /// Returns error if:
    /// - Model or tokenizer file not found or invalid
    /// - ONNX Runtime initialization fails on both CUDA and CPU
    /// - Model output is not `[batch, seq_len, hidden]`
    ///
    /// # Example
    /// ```ignore
    /// let model = OnnxEmbeddingModel::new(
    ///     "nomic-embed-text-v1.5",
    ///     "/workspace/models/nomic-embed-text-v1.5/onnx/model.onnx",
    ///     "/workspace/models/nomic-embed-text-v1.5/tokenizer.json",
    ///     512,
    /// )?;
    /// ```
    pub fn new<P: AsRef<Path>>(
        model_name: impl Into<String>,
        model_path: P,
        tokenizer_path: P,
        max_length: usize,
    ) -> Result<Self> {
        let model_name = model_name.into();
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer_path.display());
        }

        info!("Initializing ONNX embedding model {}", model_name);
        let (mut session, execution_path) = build_session_with_fallback(model_path)?;
        info!("ONNX embedding model loaded on {} path", execution_path);

        let tokenizer = load_tokenizer(tokenizer_path, max_length)?;

        let dimension = {
            let encoding = tokenizer
                .encode("validation test", true)
                .map_err(|e| anyhow::anyhow!("Tokenizer validation failed: {}", e))?;
            let batch = EncodedBatch::from_encodings(&[encoding]);
            let output = run_batch(&mut session, &batch)?;
            let shape = output.shape();

            // Token-level embeddings: [batch, seq_len, hidden_dim]
            if shape.len() != 3 || shape[2] == 0 {
                anyhow::bail!(
                    "Model outputs unexpected dimensions: {:?} (expected [batch, seq_len, hidden])",
                    shape
                );
            }
            shape[2]
        };

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            model_name,
            dimension,
            max_length,
            execution_path,
        })
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        let batch = EncodedBatch::from_encodings(&encodings);

        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| anyhow::anyhow!("Embedding session lock poisoned: {}", e))?;
            run_batch(&mut session, &batch)?
        };

        let embeddings = mean_pool(output, &batch)?;

        for (i, emb) in embeddings.iter().enumerate() {
            if emb.len() != self.dimension {
                anyhow::bail!(
                    "Unexpected embedding dimension at index {}: {} (expected {})",
                    i,
                    emb.len(),
                    self.dimension
                );
            }
        }

        Ok(embeddings)
    }
}

pub(crate) fn load_tokenizer(path: &Path, max_length: usize) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;
    // Padding is applied per batch in EncodedBatch
    tokenizer.with_padding(None);

    Ok(tokenizer)
}

/// Attention-masked mean pooling over the sequence axis
fn mean_pool(output: ArrayD<f32>, batch: &EncodedBatch) -> Result<Vec<Vec<f32>>> {
    let output = output
        .into_dimensionality::<Ix3>()
        .context("Expected [batch, seq_len, hidden] output")?;

    let mut embeddings = Vec::with_capacity(batch.batch_size);
    for batch_idx in 0..batch.batch_size {
        let item = output.index_axis(Axis(0), batch_idx); // [seq_len, hidden_dim]
        let seq_len = item.shape()[0];
        let hidden_dim = item.shape()[1];
        let mask = batch.mask_row(batch_idx);

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut sum_mask = 0.0f32;

        for i in 0..seq_len.min(mask.len()) {
            let mask_value = mask[i] as f32;
            if mask_value == 0.0 {
                continue;
            }
            sum_mask += mask_value;
            for (j, value) in pooled.iter_mut().enumerate() {
                *value += item[[i, j]] * mask_value;
            }
        }

        for value in &mut pooled {
            *value /= sum_mask.max(1e-9);
        }

        embeddings.push(pooled);
    }

    Ok(embeddings)
}
