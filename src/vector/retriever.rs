// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vector retrieval
//!
//! [`RemoteThenLocal`] asks the remote backend first and falls back to a
//! brute-force scan of the local store when the remote yields no rows,
//! whether because it is empty, failed, or timed out. Remote failures are
//! logged and absorbed; retrieval itself never fails.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::local_store::LocalPassageStore;
use super::remote::RemoteVectorBackend;
use super::similarity::QueryVector;
use crate::rag::types::{Passage, RetrievalResult, RetrievalSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates requested from vector search (before reranking)
    pub candidate_limit: usize,
    /// Cosine score below which candidates are dropped
    pub similarity_floor: f32,
    /// Upper bound on one remote search; exceeding it counts as zero rows
    pub remote_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 20,
            similarity_floor: 0.35,
            remote_timeout_ms: 3000,
        }
    }
}

/// Which backend produced the candidates
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    Remote(Vec<Passage>),
    Local(Vec<Passage>),
    Empty,
}

impl RetrievalOutcome {
    pub fn source(&self) -> RetrievalSource {
        match self {
            RetrievalOutcome::Remote(_) => RetrievalSource::Remote,
            RetrievalOutcome::Local(_) => RetrievalSource::Local,
            RetrievalOutcome::Empty => RetrievalSource::Empty,
        }
    }

    pub fn into_passages(self) -> Vec<Passage> {
        match self {
            RetrievalOutcome::Remote(passages) | RetrievalOutcome::Local(passages) => passages,
            RetrievalOutcome::Empty => vec![],
        }
    }
}

pub struct RemoteThenLocal {
    remote: Option<Arc<dyn RemoteVectorBackend>>,
    local: Arc<LocalPassageStore>,
}

impl RemoteThenLocal {
    pub fn new(remote: Option<Arc<dyn RemoteVectorBackend>>, local: Arc<LocalPassageStore>) -> Self {
        Self { remote, local }
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteVectorBackend>> {
        self.remote.as_ref()
    }

    pub fn local(&self) -> &Arc<LocalPassageStore> {
        &self.local
    }

    pub async fn execute(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        top_k: usize,
        remote_timeout: Duration,
    ) -> RetrievalOutcome {
        if top_k == 0 {
            return RetrievalOutcome::Empty;
        }

        let remote_rows = self.search_remote(assistant_id, query, top_k, remote_timeout).await;
        if !remote_rows.is_empty() {
            return RetrievalOutcome::Remote(remote_rows);
        }

        let local_rows = self.local.search(assistant_id, query.as_slice(), top_k).await;
        if !local_rows.is_empty() {
            debug!(
                "Remote returned no rows for assistant {}, using {} local passages",
                assistant_id,
                local_rows.len()
            );
            return RetrievalOutcome::Local(local_rows);
        }

        RetrievalOutcome::Empty
    }

    async fn search_remote(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        top_k: usize,
        remote_timeout: Duration,
    ) -> Vec<Passage> {
        let Some(remote) = &self.remote else {
            return vec![];
        };

        let rows = match tokio::time::timeout(remote_timeout, remote.search(assistant_id, query, top_k)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                warn!("Remote vector search failed for assistant {}: {}", assistant_id, e);
                return vec![];
            }
            Err(_) => {
                warn!(
                    "Remote vector search for assistant {} timed out after {:?}",
                    assistant_id, remote_timeout
                );
                return vec![];
            }
        };

        let mut passages: Vec<Passage> = rows
            .into_iter()
            .filter(|row| {
                let valid = row.similarity.is_finite();
                if !valid {
                    warn!("Dropping remote row {} with non-finite score", row.source_id);
                }
                valid
            })
            .map(|row| Passage::new(row.source_id, row.text).with_similarity(row.similarity))
            .collect();
        passages.truncate(top_k);
        passages
    }
}

/// Retrieves candidates for a query and applies the similarity floor
pub struct VectorRetriever {
    strategy: RemoteThenLocal,
    config: RwLock<RetrievalConfig>,
}

impl VectorRetriever {
    pub fn new(strategy: RemoteThenLocal, config: RetrievalConfig) -> Self {
        Self {
            strategy,
            config: RwLock::new(config),
        }
    }

    pub fn strategy(&self) -> &RemoteThenLocal {
        &self.strategy
    }

    pub async fn config(&self) -> RetrievalConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: RetrievalConfig) {
        *self.config.write().await = config;
    }

    /// Top `top_k` candidates above the floor, tagged with their source
    ///
    /// An assistant with no passages anywhere yields an `Empty` result, not
    /// an error. The source tag names the backend that produced the rows even
    /// when the floor then removes all of them.
    pub async fn retrieve(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        top_k: usize,
    ) -> RetrievalResult {
        let start = Instant::now();
        let outcome = self.retrieve_candidates(assistant_id, query, top_k).await;
        self.filter(assistant_id, outcome, start).await
    }

    /// Unfiltered candidates from the remote-then-local strategy
    pub async fn retrieve_candidates(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        top_k: usize,
    ) -> RetrievalOutcome {
        let remote_timeout = Duration::from_millis(self.config.read().await.remote_timeout_ms);
        self.strategy
            .execute(assistant_id, query, top_k, remote_timeout)
            .await
    }

    /// Applies the similarity floor to `outcome`; latency is measured from `started`
    pub async fn filter(
        &self,
        assistant_id: &str,
        outcome: RetrievalOutcome,
        started: Instant,
    ) -> RetrievalResult {
        if outcome == RetrievalOutcome::Empty {
            debug!("No candidates for assistant {}", assistant_id);
            return RetrievalResult::empty(started.elapsed().as_secs_f64() * 1000.0);
        }

        let floor = self.config.read().await.similarity_floor;
        let source = outcome.source();
        let candidates = outcome.into_passages();
        let candidate_count = candidates.len();
        let passages = apply_floor(candidates, floor);

        debug!(
            "Retrieved {} candidates from {} for assistant {}, {} above floor {}",
            candidate_count,
            source,
            assistant_id,
            passages.len(),
            floor
        );

        RetrievalResult {
            filtered_count: passages.len(),
            passages,
            source,
            query_latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            candidate_count,
        }
    }
}

/// Keeps passages whose similarity is at least `floor`, preserving order
///
/// Passages without a similarity score are kept.
pub fn apply_floor(passages: Vec<Passage>, floor: f32) -> Vec<Passage> {
    passages
        .into_iter()
        .filter(|p| p.similarity.map_or(true, |s| s >= floor))
        .collect()
}
