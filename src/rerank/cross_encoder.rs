// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX Cross-Encoder Wrapper
//!
//! Scores (query, passage) pairs with a sequence-classification model such as
//! ms-marco-MiniLM-L-6-v2. Each pair is encoded jointly
//! (`[CLS] query [SEP] passage [SEP]`) and the model emits one relevance
//! logit per pair.
//!
//! Unlike the embedding model, a cross-encoder session is built on exactly
//! one execution path; the [`Reranker`](super::Reranker) decides which path
//! to try and when to fall back.

use anyhow::Result;
use ndarray::{ArrayD, Axis};
use ort::session::Session;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::{EncodeInput, Tokenizer};
use tracing::info;

use super::CrossEncoderModel;
use crate::embeddings::onnx_model::load_tokenizer;
use crate::models::onnx::{build_session, run_batch, EncodedBatch};
use crate::models::ExecutionPath;

#[derive(Clone)]
pub struct OnnxCrossEncoder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    model_name: String,
    execution_path: ExecutionPath,
}

impl std::fmt::Debug for OnnxCrossEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxCrossEncoder")
            .field("model_name", &self.model_name)
            .field("execution_path", &self.execution_path)
            .finish_non_exhaustive()
    }
}

impl OnnxCrossEncoder {
    /// Loads the cross-encoder on `path`. Blocking.
    ///
    /// # Errors
    /// Returns error if the tokenizer is missing or the session cannot be
    /// built on the requested execution path.
    pub fn new<P: AsRef<Path>>(
        model_name: impl Into<String>,
        model_path: P,
        tokenizer_path: P,
        max_length: usize,
        path: ExecutionPath,
    ) -> Result<Self> {
        let model_name = model_name.into();
        let tokenizer_path = tokenizer_path.as_ref();

        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer_path.display());
        }

        info!("Initializing cross-encoder {} on {} path", model_name, path);
        let session = build_session(model_path.as_ref(), path)?;
        let tokenizer = load_tokenizer(tokenizer_path, max_length)?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            model_name,
            execution_path: path,
        })
    }
}

impl CrossEncoderModel for OnnxCrossEncoder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn execution_path(&self) -> ExecutionPath {
        self.execution_path
    }

    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<Option<f32>>> {
        if passages.is_empty() {
            return Ok(vec![]);
        }

        let inputs: Vec<EncodeInput> = passages
            .iter()
            .map(|passage| (query.to_string(), passage.clone()).into())
            .collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        let batch = EncodedBatch::from_encodings(&encodings);

        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| anyhow::anyhow!("Cross-encoder session lock poisoned: {}", e))?;
            run_batch(&mut session, &batch)?
        };

        logits_per_pair(output, passages.len())
    }
}

/// One logit per batch row
///
/// Accepts `[batch]` or `[batch, labels]` outputs; for multi-label heads the
/// last column is taken as the relevant class. Rows the model did not emit,
/// and non-finite values, come back as `None`.
fn logits_per_pair(output: ArrayD<f32>, expected: usize) -> Result<Vec<Option<f32>>> {
    let logits: Vec<Option<f32>> = match output.ndim() {
        1 => output.iter().map(|&v| Some(v)).collect(),
        2 => output
            .axis_iter(Axis(0))
            .map(|row| row.iter().last().copied())
            .collect(),
        n => anyhow::bail!("Unexpected cross-encoder output rank {}", n),
    };

    let mut logits: Vec<Option<f32>> = logits
        .into_iter()
        .map(|logit| logit.filter(|v| v.is_finite()))
        .collect();
    logits.resize(expected, None);
    Ok(logits)
}
