// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod cache;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod models;
pub mod rag;
pub mod rerank;
pub mod vector;

// Re-export the pipeline surface
pub use cache::{CacheEntry, CacheStats, SemanticCache, SemanticCacheConfig};
pub use config::RagConfig;
pub use embeddings::{EmbeddingConfig, EmbeddingEngine, EmbeddingRole};
pub use models::{LoadProgress, LoadStage, ProgressCallback};
pub use rag::{
    ModelError, Passage, QueryStage, RagError, RagQueryOrchestrator, RagResponse,
    RetrievalResult, RetrievalSource,
};
pub use rerank::{Reranker, RerankerConfig};
pub use vector::{QueryVector, RetrievalConfig, VectorRetriever};
