// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Local fallback passage store
//!
//! In-memory passages with vectors, scoped by assistant. Searched by brute
//! force when the remote backend has nothing to offer.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::similarity::{cosine_similarity, VectorError};
use crate::rag::types::Passage;

#[derive(Debug, Default)]
struct AssistantPassages {
    /// Shared by every passage of the assistant, set by the first insert
    dimension: Option<usize>,
    passages: Vec<Passage>,
}

#[derive(Debug, Default)]
pub struct LocalPassageStore {
    assistants: RwLock<HashMap<String, AssistantPassages>>,
}

impl LocalPassageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a passage, replacing any passage with the same source id in place
    ///
    /// # Errors
    /// - `MissingVector` if the passage has no vector
    /// - `Empty` / `NonFinite` for malformed vectors
    /// - `DimensionMismatch` if the vector differs from the assistant's others
    pub async fn insert(&self, assistant_id: &str, passage: Passage) -> Result<(), VectorError> {
        let dimension = validate_vector(&passage)?;

        let mut assistants = self.assistants.write().await;
        let entry = assistants.entry(assistant_id.to_string()).or_default();

        match entry.dimension {
            Some(expected) if expected != dimension => {
                return Err(VectorError::DimensionMismatch {
                    expected,
                    actual: dimension,
                });
            }
            Some(_) => {}
            None => entry.dimension = Some(dimension),
        }

        match entry
            .passages
            .iter_mut()
            .find(|existing| existing.source_id == passage.source_id)
        {
            Some(existing) => *existing = passage,
            None => entry.passages.push(passage),
        }

        Ok(())
    }

    /// Inserts every passage, stopping at the first invalid one
    pub async fn insert_many(
        &self,
        assistant_id: &str,
        passages: impl IntoIterator<Item = Passage>,
    ) -> Result<usize, VectorError> {
        let mut inserted = 0;
        for passage in passages {
            self.insert(assistant_id, passage).await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub async fn remove(&self, assistant_id: &str, source_id: &str) -> bool {
        let mut assistants = self.assistants.write().await;
        let Some(entry) = assistants.get_mut(assistant_id) else {
            return false;
        };

        let before = entry.passages.len();
        entry.passages.retain(|p| p.source_id != source_id);
        let removed = entry.passages.len() != before;

        if entry.passages.is_empty() {
            assistants.remove(assistant_id);
        }
        removed
    }

    /// Drops every passage of the assistant, returning how many there were
    pub async fn clear_assistant(&self, assistant_id: &str) -> usize {
        self.assistants
            .write()
            .await
            .remove(assistant_id)
            .map_or(0, |entry| entry.passages.len())
    }

    pub async fn count(&self, assistant_id: &str) -> usize {
        self.assistants
            .read()
            .await
            .get(assistant_id)
            .map_or(0, |entry| entry.passages.len())
    }

    pub async fn total_count(&self) -> usize {
        self.assistants
            .read()
            .await
            .values()
            .map(|entry| entry.passages.len())
            .sum()
    }

    /// Snapshot of the assistant's passages in insertion order
    pub async fn passages(&self, assistant_id: &str) -> Vec<Passage> {
        self.assistants
            .read()
            .await
            .get(assistant_id)
            .map(|entry| entry.passages.clone())
            .unwrap_or_default()
    }

    /// Brute-force cosine search, best first, at most `top_k` passages
    ///
    /// Returned passages carry their `similarity` but not their vector.
    /// Equal scores keep insertion order.
    pub async fn search(&self, assistant_id: &str, query: &[f32], top_k: usize) -> Vec<Passage> {
        let assistants = self.assistants.read().await;
        let Some(entry) = assistants.get(assistant_id) else {
            return vec![];
        };

        let mut scored: Vec<Passage> = entry
            .passages
            .iter()
            .filter_map(|passage| {
                let vector = passage.vector.as_ref()?;
                if vector.len() != query.len() {
                    return None;
                }
                let similarity = cosine_similarity(query, vector);
                Some(Passage {
                    vector: None,
                    ..passage.clone()
                }
                .with_similarity(similarity))
            })
            .collect();

        scored.sort_by(|a, b| {
            let a = a.similarity.unwrap_or(f32::MIN);
            let b = b.similarity.unwrap_or(f32::MIN);
            b.total_cmp(&a)
        });
        scored.truncate(top_k);

        debug!(
            "Local search for assistant {} scored {} of {} passages",
            assistant_id,
            scored.len(),
            entry.passages.len()
        );
        scored
    }
}

fn validate_vector(passage: &Passage) -> Result<usize, VectorError> {
    let vector = passage
        .vector
        .as_ref()
        .ok_or_else(|| VectorError::MissingVector {
            source_id: passage.source_id.clone(),
        })?;

    if vector.is_empty() {
        return Err(VectorError::Empty);
    }
    if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
        return Err(VectorError::NonFinite { index });
    }

    Ok(vector.len())
}
