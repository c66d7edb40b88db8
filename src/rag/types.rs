// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use serde::{Deserialize, Serialize};
use std::fmt;

/// One chunk of a source document
///
/// Scores from the two stages live in separate fields: `similarity` is a
/// cosine score in [-1, 1] from vector search, `relevance_score` is a
/// cross-encoder probability in [0, 1]. They are never compared with each
/// other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub similarity: Option<f32>,
    #[serde(default)]
    pub relevance_score: Option<f32>,
}

impl Passage {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
            vector: None,
            similarity: None,
            relevance_score: None,
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_similarity(mut self, similarity: f32) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// The score that determined this passage's position, tagged with its stage
    pub fn ranking_score(&self) -> Option<(ScoreStage, f32)> {
        match (self.relevance_score, self.similarity) {
            (Some(score), _) => Some((ScoreStage::CrossEncoder, score)),
            (None, Some(score)) => Some((ScoreStage::VectorSimilarity, score)),
            (None, None) => None,
        }
    }
}

/// Pipeline stage that produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStage {
    VectorSimilarity,
    CrossEncoder,
}

/// Which backend produced a retrieval result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Remote,
    Local,
    Empty,
}

impl RetrievalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalSource::Remote => "remote",
            RetrievalSource::Local => "local",
            RetrievalSource::Empty => "empty",
        }
    }
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one retrieval, produced once per query and never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub passages: Vec<Passage>,
    pub source: RetrievalSource,
    pub query_latency_ms: f64,
    /// Rows returned by the backend before the similarity floor
    pub candidate_count: usize,
    /// Rows that survived the similarity floor
    pub filtered_count: usize,
}

impl RetrievalResult {
    pub fn empty(query_latency_ms: f64) -> Self {
        Self {
            passages: Vec::new(),
            source: RetrievalSource::Empty,
            query_latency_ms,
            candidate_count: 0,
            filtered_count: 0,
        }
    }
}
