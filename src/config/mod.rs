// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Pipeline configuration
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML file (every section and field optional)
//! 3. `RAG_*` environment variables (a `.env` file is honoured)

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::cache::SemanticCacheConfig;
use crate::embeddings::EmbeddingConfig;
use crate::rag::context::ContextConfig;
use crate::rag::errors::RagError;
use crate::rerank::RerankerConfig;
use crate::vector::{RemoteBackendConfig, RetrievalConfig, VectorBackend};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Clear an assistant's cached results whenever a passage is indexed
    pub invalidate_cache_on_ingest: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub embedding: EmbeddingConfig,
    pub reranker: RerankerConfig,
    pub retrieval: RetrievalConfig,
    pub cache: SemanticCacheConfig,
    pub context: ContextConfig,
    pub remote: RemoteBackendConfig,
    pub ingest: IngestConfig,
}

impl RagConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, RagError> {
        toml::from_str(contents).map_err(|e| RagError::Config(format!("Invalid TOML: {}", e)))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, RagError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut config = Self::default();
        config.apply_env_from(|key| env::var(key).ok());
        config
    }

    /// File (if given), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, RagError> {
        dotenv::dotenv().ok();
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies `RAG_*` overrides read through `lookup`
    ///
    /// Unparseable values are ignored and the previous value kept.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v.to_lowercase() != "false");

        if let Some(v) = lookup("RAG_EMBEDDING_MODEL_ID") {
            self.embedding.model_id = v;
        }
        if let Some(v) = lookup("RAG_EMBEDDING_MODEL_DIR") {
            self.embedding.model_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = parse_var(&lookup, "RAG_EMBEDDING_DIMENSION") {
            self.embedding.dimension = v;
        }

        if let Some(v) = flag("RAG_RERANKER_ENABLED") {
            self.reranker.enabled = v;
        }
        if let Some(v) = lookup("RAG_RERANKER_MODEL_ID") {
            self.reranker.model_id = v;
        }
        if let Some(v) = lookup("RAG_RERANKER_MODEL_DIR") {
            self.reranker.model_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = flag("RAG_RERANKER_PREFER_ACCELERATED") {
            self.reranker.prefer_accelerated = v;
        }
        if let Some(v) = parse_var(&lookup, "RAG_RERANK_TOP_K") {
            self.reranker.top_k = v;
        }

        if let Some(v) = parse_var(&lookup, "RAG_CANDIDATE_LIMIT") {
            self.retrieval.candidate_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "RAG_SIMILARITY_FLOOR") {
            self.retrieval.similarity_floor = v;
        }
        if let Some(v) = parse_var(&lookup, "RAG_REMOTE_TIMEOUT_MS") {
            self.retrieval.remote_timeout_ms = v;
        }

        if let Some(v) = flag("RAG_CACHE_ENABLED") {
            self.cache.enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "RAG_CACHE_THRESHOLD") {
            self.cache.similarity_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "RAG_CACHE_MAX_ENTRIES") {
            self.cache.max_entries_per_assistant = v;
        }
        if let Some(v) = parse_var(&lookup, "RAG_CACHE_TTL_SECS") {
            self.cache.ttl_seconds = v;
        }
        if let Some(v) = lookup("RAG_CACHE_PATH") {
            self.cache.persistence_path = Some(PathBuf::from(v));
        }

        if let Some(url) = lookup("RAG_VECTOR_DB_URL") {
            self.remote.backend = VectorBackend::Real { api_url: url };
        }
        if let Some(key) = lookup("RAG_VECTOR_DB_API_KEY") {
            self.remote.api_key = Some(key);
        }

        if let Some(v) = flag("RAG_INVALIDATE_CACHE_ON_INGEST") {
            self.ingest.invalidate_cache_on_ingest = v;
        }
    }

    pub fn validate(&self) -> Result<(), RagError> {
        let invalid = |msg: String| Err(RagError::Config(msg));

        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be greater than 0".to_string());
        }
        if self.embedding.max_length == 0 || self.reranker.max_length == 0 {
            return invalid("max_length must be greater than 0".to_string());
        }
        if self.reranker.top_k == 0 {
            return invalid("reranker.top_k must be greater than 0".to_string());
        }
        if self.retrieval.candidate_limit == 0 {
            return invalid("retrieval.candidate_limit must be greater than 0".to_string());
        }
        if !(-1.0..=1.0).contains(&self.retrieval.similarity_floor) {
            return invalid(format!(
                "retrieval.similarity_floor must be in [-1, 1], got {}",
                self.retrieval.similarity_floor
            ));
        }
        if self.retrieval.remote_timeout_ms == 0 || self.remote.timeout_ms == 0 {
            return invalid("timeouts must be greater than 0".to_string());
        }
        if let VectorBackend::Real { api_url } = &self.remote.backend {
            if api_url.trim().is_empty() {
                return invalid("remote.backend.api_url must not be empty".to_string());
            }
        }
        self.cache
            .validate()
            .map_err(|e| RagError::Config(e.to_string()))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
