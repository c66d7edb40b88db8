// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rag::types::{Passage, RetrievalSource};
use crate::vector::QueryVector;

/// A stored (query, assistant) → results mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: Uuid,
    pub assistant_id: String,
    pub query_vector: QueryVector,
    pub query_text: String,
    /// Final (post-rerank) passages, returned as-is on a hit
    pub results: Vec<Passage>,
    /// Backend that produced `results`
    pub source: RetrievalSource,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(
        assistant_id: impl Into<String>,
        query_vector: QueryVector,
        query_text: impl Into<String>,
        results: Vec<Passage>,
        source: RetrievalSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assistant_id: assistant_id.into(),
            query_vector,
            query_text: query_text.into(),
            results,
            source,
            created_at: now,
            last_accessed_at: now,
            hit_count: 0,
        }
    }

    /// Untouched for longer than `ttl_seconds` at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, ttl_seconds: u64) -> bool {
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        (now - self.last_accessed_at).num_seconds() > ttl
    }
}

/// A successful lookup
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// Snapshot of the entry after this hit was recorded
    pub entry: CacheEntry,
    /// Cosine similarity between the lookup vector and the entry's vector
    pub similarity: f32,
}
