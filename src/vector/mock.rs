// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-process stand-in for the remote vector backend

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::remote::{RemoteBackendError, RemoteMatch, RemoteVectorBackend};
use super::similarity::QueryVector;

#[derive(Debug, Clone)]
struct StoredVector {
    source_id: String,
    text: String,
    vector: QueryVector,
}

/// Brute-force backend keyed by assistant
///
/// Scores with the same `1 - cosine_distance` the real backend uses, which
/// for normalized vectors is the cosine itself.
#[derive(Debug, Default)]
pub struct InMemoryVectorBackend {
    assistants: RwLock<HashMap<String, Vec<StoredVector>>>,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, assistant_id: &str) -> usize {
        self.assistants
            .read()
            .await
            .get(assistant_id)
            .map_or(0, Vec::len)
    }

    pub async fn clear_assistant(&self, assistant_id: &str) -> usize {
        self.assistants
            .write()
            .await
            .remove(assistant_id)
            .map_or(0, |rows| rows.len())
    }
}

#[async_trait]
impl RemoteVectorBackend for InMemoryVectorBackend {
    async fn search(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        top_k: usize,
    ) -> Result<Vec<RemoteMatch>, RemoteBackendError> {
        let assistants = self.assistants.read().await;
        let Some(rows) = assistants.get(assistant_id) else {
            return Ok(vec![]);
        };

        let mut matches: Vec<RemoteMatch> = rows
            .iter()
            .filter_map(|row| {
                query.similarity(&row.vector).map(|similarity| RemoteMatch {
                    text: row.text.clone(),
                    source_id: row.source_id.clone(),
                    similarity,
                })
            })
            .collect();

        // Stable: equal scores keep insertion order
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn upsert_vector(
        &self,
        source_id: &str,
        assistant_id: &str,
        text: &str,
        vector: &QueryVector,
    ) -> Result<(), RemoteBackendError> {
        let mut assistants = self.assistants.write().await;
        let rows = assistants.entry(assistant_id.to_string()).or_default();
        let stored = StoredVector {
            source_id: source_id.to_string(),
            text: text.to_string(),
            vector: vector.clone(),
        };

        match rows.iter_mut().find(|row| row.source_id == source_id) {
            Some(existing) => *existing = stored,
            None => rows.push(stored),
        }
        Ok(())
    }
}
