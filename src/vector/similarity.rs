// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vector format shared by the embedding engine, retriever and cache
//!
//! Every vector that enters the pipeline is unit-normalized, so cosine
//! similarity between two [`QueryVector`]s is a plain dot product.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tolerance used when checking `‖v‖₂ == 1`
pub const NORM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error("Vector must not be empty")]
    Empty,
    #[error("Vector contains NaN or Infinity at index {index}")]
    NonFinite { index: usize },
    #[error("Vector has zero norm and cannot be normalized")]
    ZeroNorm,
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Passage {source_id} has no vector")]
    MissingVector { source_id: String },
}

/// A unit-normalized embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct QueryVector {
    data: Vec<f32>,
}

impl QueryVector {
    /// L2-normalizes `data` into a query vector
    pub fn normalized(mut data: Vec<f32>) -> Result<Self, VectorError> {
        if data.is_empty() {
            return Err(VectorError::Empty);
        }
        if let Some(index) = data.iter().position(|v| !v.is_finite()) {
            return Err(VectorError::NonFinite { index });
        }

        let norm = l2_norm(&data);
        if norm == 0.0 {
            return Err(VectorError::ZeroNorm);
        }
        for value in &mut data {
            *value /= norm;
        }

        Ok(Self { data })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.data)
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    /// Cosine similarity with another normalized vector
    ///
    /// Returns `None` on dimension mismatch.
    pub fn similarity(&self, other: &QueryVector) -> Option<f32> {
        if self.dimension() != other.dimension() {
            return None;
        }
        Some(dot(&self.data, &other.data).clamp(-1.0, 1.0))
    }

    /// Encodes the vector as a comma-separated float list for the remote backend
    pub fn to_wire(&self) -> String {
        encode_vector(&self.data)
    }
}

impl TryFrom<Vec<f32>> for QueryVector {
    type Error = VectorError;

    fn try_from(data: Vec<f32>) -> Result<Self, Self::Error> {
        QueryVector::normalized(data)
    }
}

impl From<QueryVector> for Vec<f32> {
    fn from(vector: QueryVector) -> Self {
        vector.data
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between two raw vectors
///
/// Does not assume normalization. Returns 0.0 on dimension mismatch or when
/// either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// Comma-separated float list, the remote backend's vector encoding
pub fn encode_vector(v: &[f32]) -> String {
    v.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn decode_vector(s: &str) -> Result<Vec<f32>, String> {
    let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid float '{}': {}", part.trim(), e))
        })
        .collect()
}
