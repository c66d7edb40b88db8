// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Semantic cache of retrieval results

pub mod entry;
pub mod persistence;
pub mod semantic_cache;
pub mod stats;

pub use entry::{CacheEntry, CacheHit};
pub use persistence::{CachePersistence, JsonFileCachePersistence};
pub use semantic_cache::{SemanticCache, SemanticCacheConfig};
pub use stats::{CacheStats, MaintenanceReport};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cached vectors have dimension {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
