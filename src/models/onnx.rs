// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! ONNX Runtime session construction
//!
//! Two execution paths are supported: CUDA (accelerated) and the CPU provider
//! that every ONNX Runtime build ships with. The accelerated path registers
//! CUDA with `error_on_failure` so a missing driver surfaces as an error
//! instead of a silent CPU session.

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayD};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokenizers::Encoding;
use tracing::{info, warn};

const INTRA_THREADS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    /// GPU via the CUDA execution provider
    Accelerated,
    /// CPU execution provider, always available
    Cpu,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPath::Accelerated => f.write_str("accelerated (CUDA)"),
            ExecutionPath::Cpu => f.write_str("cpu"),
        }
    }
}

/// Builds a session for `model_path` on exactly one execution path
pub fn build_session(model_path: &Path, path: ExecutionPath) -> Result<Session> {
    if !model_path.exists() {
        anyhow::bail!("ONNX model file not found: {}", model_path.display());
    }

    let builder = Session::builder().context("Failed to create session builder")?;
    let builder = match path {
        ExecutionPath::Accelerated => builder
            .with_execution_providers([CUDAExecutionProvider::default()
                .build()
                .error_on_failure()])
            .context("Failed to set CUDA execution provider")?,
        ExecutionPath::Cpu => builder
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("Failed to set CPU execution provider")?,
    };

    builder
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(INTRA_THREADS)
        .context("Failed to set intra threads")?
        .commit_from_file(model_path)
        .context(format!(
            "Failed to load ONNX model from {} on {} path",
            model_path.display(),
            path
        ))
}

/// Builds a session preferring CUDA and quietly settling for CPU
///
/// Used by the embedding model, where either device is acceptable and only a
/// CPU failure is worth reporting.
pub fn build_session_with_fallback(model_path: &Path) -> Result<(Session, ExecutionPath)> {
    info!("Attempting CUDA execution provider for {}", model_path.display());
    match build_session(model_path, ExecutionPath::Accelerated) {
        Ok(session) => {
            info!("CUDA execution provider initialized");
            Ok((session, ExecutionPath::Accelerated))
        }
        Err(e) => {
            warn!("CUDA execution provider failed: {:#}", e);
            warn!("Falling back to CPU execution provider");
            let session = build_session(model_path, ExecutionPath::Cpu)?;
            Ok((session, ExecutionPath::Cpu))
        }
    }
}

/// Whether the session declares an input with the given name
pub fn has_input(session: &Session, name: &str) -> bool {
    session.inputs.iter().any(|input| input.name == name)
}

/// Tokenized batch padded to the longest sequence
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub batch_size: usize,
    pub seq_len: usize,
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

impl EncodedBatch {
    pub fn from_encodings(encodings: &[Encoding]) -> Self {
        let seq_len = encodings
            .iter()
            .map(|enc| enc.get_ids().len())
            .max()
            .unwrap_or(0);
        let capacity = encodings.len() * seq_len;

        let mut input_ids = Vec::with_capacity(capacity);
        let mut attention_mask = Vec::with_capacity(capacity);
        let mut token_type_ids = Vec::with_capacity(capacity);

        for encoding in encodings {
            let ids = encoding.get_ids();
            input_ids.extend(ids.iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
            token_type_ids.extend(encoding.get_type_ids().iter().map(|&t| t as i64));

            let padding = seq_len - ids.len();
            input_ids.extend(std::iter::repeat(0i64).take(padding));
            attention_mask.extend(std::iter::repeat(0i64).take(padding));
            token_type_ids.extend(std::iter::repeat(0i64).take(padding));
        }

        Self {
            batch_size: encodings.len(),
            seq_len,
            input_ids,
            attention_mask,
            token_type_ids,
        }
    }

    /// Attention mask row for one batch item
    pub fn mask_row(&self, index: usize) -> &[i64] {
        let start = index * self.seq_len;
        &self.attention_mask[start..start + self.seq_len]
    }
}

/// Runs one forward pass and returns the first output as an owned array
pub fn run_batch(session: &mut Session, batch: &EncodedBatch) -> Result<ArrayD<f32>> {
    let shape = (batch.batch_size, batch.seq_len);
    let input_ids = Array2::from_shape_vec(shape, batch.input_ids.clone())
        .context("Failed to create input_ids array")?;
    let attention_mask = Array2::from_shape_vec(shape, batch.attention_mask.clone())
        .context("Failed to create attention_mask array")?;

    let outputs = if has_input(session, "token_type_ids") {
        let token_type_ids = Array2::from_shape_vec(shape, batch.token_type_ids.clone())
            .context("Failed to create token_type_ids array")?;
        session.run(ort::inputs![
            "input_ids" => Value::from_array(input_ids)?,
            "attention_mask" => Value::from_array(attention_mask)?,
            "token_type_ids" => Value::from_array(token_type_ids)?
        ])?
    } else {
        session.run(ort::inputs![
            "input_ids" => Value::from_array(input_ids)?,
            "attention_mask" => Value::from_array(attention_mask)?
        ])?
    };

    // Index [0] rather than a name: exported models disagree on output names
    let output = outputs[0]
        .try_extract_array::<f32>()
        .context("Failed to extract output tensor")?;

    Ok(output.to_owned())
}
