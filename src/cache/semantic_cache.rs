// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Semantic result cache
//!
//! Maps (assistant, query vector) to the final passages of a previous run.
//! A lookup hits when a stored vector for the same assistant has cosine
//! similarity above `similarity_threshold` with the query. Each assistant
//! has its own LRU with `max_entries_per_assistant` slots, so one busy
//! assistant never evicts another's entries. Entries not hit or stored for
//! longer than `ttl_seconds` are ignored by lookups and removed by
//! maintenance.
//!
//! All state sits behind one `RwLock`: a lookup or store is applied
//! completely or not at all as seen by any other caller.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::persistence::CachePersistence;
use super::stats::{CacheStats, MaintenanceReport, StatsCounters};
use super::{CacheEntry, CacheError, CacheHit};
use crate::rag::types::{Passage, RetrievalSource};
use crate::vector::QueryVector;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticCacheConfig {
    pub enabled: bool,
    /// Cosine similarity a hit must exceed
    pub similarity_threshold: f32,
    pub max_entries_per_assistant: usize,
    pub ttl_seconds: u64,
    /// Write the whole cache to `persistence_path` after every store
    pub persist_on_store: bool,
    pub persistence_path: Option<PathBuf>,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.9,
            max_entries_per_assistant: 1000,
            ttl_seconds: 30 * 24 * 60 * 60,
            persist_on_store: false,
            persistence_path: None,
        }
    }
}

impl SemanticCacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(CacheError::InvalidConfig(format!(
                "similarity_threshold must be in [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.max_entries_per_assistant == 0 {
            return Err(CacheError::InvalidConfig(
                "max_entries_per_assistant must be greater than 0".to_string(),
            ));
        }
        if self.ttl_seconds == 0 {
            return Err(CacheError::InvalidConfig(
                "ttl_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn capacity(&self) -> Result<NonZeroUsize, CacheError> {
        NonZeroUsize::new(self.max_entries_per_assistant).ok_or_else(|| {
            CacheError::InvalidConfig("max_entries_per_assistant must be greater than 0".to_string())
        })
    }
}

struct CacheState {
    config: SemanticCacheConfig,
    assistants: HashMap<String, LruCache<Uuid, CacheEntry>>,
    counters: StatsCounters,
}

impl CacheState {
    /// Best live entry above the threshold; ties go to the most recent
    fn best_match(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        now: DateTime<Utc>,
    ) -> Result<Option<(Uuid, f32)>, CacheError> {
        let Some(cache) = self.assistants.get(assistant_id) else {
            return Ok(None);
        };

        let mut best: Option<(Uuid, f32)> = None;
        // Most- to least-recently used
        for (id, entry) in cache.iter() {
            let similarity =
                query
                    .similarity(&entry.query_vector)
                    .ok_or(CacheError::DimensionMismatch {
                        expected: entry.query_vector.dimension(),
                        actual: query.dimension(),
                    })?;

            if similarity <= self.config.similarity_threshold
                || entry.is_expired(now, self.config.ttl_seconds)
            {
                continue;
            }
            if best.map_or(true, |(_, score)| similarity > score) {
                best = Some((*id, similarity));
            }
        }

        Ok(best)
    }

    fn snapshot_entries(&self) -> Vec<CacheEntry> {
        let mut assistants: Vec<_> = self.assistants.iter().collect();
        assistants.sort_by(|a, b| a.0.cmp(b.0));

        assistants
            .into_iter()
            .flat_map(|(_, cache)| cache.iter().rev().map(|(_, entry)| entry.clone()))
            .collect()
    }
}

pub struct SemanticCache {
    state: RwLock<CacheState>,
    persistence: Option<Arc<dyn CachePersistence>>,
    /// Held from snapshot to save so the last write is the newest state
    flush_lock: Mutex<()>,
}

impl SemanticCache {
    pub fn new(config: SemanticCacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            state: RwLock::new(CacheState {
                config,
                assistants: HashMap::new(),
                counters: StatsCounters::default(),
            }),
            persistence: None,
            flush_lock: Mutex::new(()),
        })
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn CachePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub async fn config(&self) -> SemanticCacheConfig {
        self.state.read().await.config.clone()
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.read().await.config.enabled
    }

    /// Applies a new configuration to the live cache
    ///
    /// A smaller capacity evicts each assistant's least recently used
    /// entries immediately. A new threshold or TTL applies from the next
    /// lookup.
    pub async fn update_config(&self, config: SemanticCacheConfig) -> Result<(), CacheError> {
        config.validate()?;
        let capacity = config.capacity()?;

        let mut state = self.state.write().await;
        let mut evicted = 0u64;
        for cache in state.assistants.values_mut() {
            let before = cache.len();
            cache.resize(capacity);
            evicted += (before - cache.len()) as u64;
        }
        state.counters.evictions += evicted;
        state.config = config;

        if evicted > 0 {
            info!("Cache capacity reduced to {}, evicted {} entries", capacity, evicted);
        }
        Ok(())
    }

    /// Finds a stored entry similar enough to `query`
    ///
    /// On a hit the entry's `last_accessed_at` and `hit_count` are updated
    /// and it becomes the assistant's most recently used entry. The returned
    /// results are exactly those stored.
    ///
    /// # Errors
    /// `DimensionMismatch` if the assistant's entries have a different
    /// dimension than `query`. The lookup is counted as a miss.
    pub async fn lookup(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        query_text: &str,
    ) -> Result<Option<CacheHit>, CacheError> {
        self.lookup_at(assistant_id, query, query_text, Utc::now()).await
    }

    pub async fn lookup_at(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        query_text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheHit>, CacheError> {
        let mut state = self.state.write().await;

        let best = match state.best_match(assistant_id, query, now) {
            Ok(best) => best,
            Err(e) => {
                state.counters.misses += 1;
                return Err(e);
            }
        };

        let Some((id, similarity)) = best else {
            state.counters.misses += 1;
            debug!("Cache miss for assistant {}: {:?}", assistant_id, query_text);
            return Ok(None);
        };

        let entry = state
            .assistants
            .get_mut(assistant_id)
            .and_then(|cache| cache.get_mut(&id))
            .map(|entry| {
                entry.last_accessed_at = now;
                entry.hit_count += 1;
                entry.clone()
            });

        match entry {
            Some(entry) => {
                state.counters.hits += 1;
                debug!(
                    "Cache hit for assistant {} (similarity {:.4}, hit #{}): {:?}",
                    assistant_id, similarity, entry.hit_count, query_text
                );
                Ok(Some(CacheHit { entry, similarity }))
            }
            None => {
                state.counters.misses += 1;
                Ok(None)
            }
        }
    }

    /// Stores the results of a full pipeline run
    ///
    /// If an entry for the assistant already matches `query` above the
    /// threshold, that entry is refreshed with the new results instead of a
    /// near-duplicate being added. Returns the id of the stored entry.
    ///
    /// When the assistant is at capacity its least recently used entry is
    /// evicted; other assistants are untouched.
    pub async fn store(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        query_text: &str,
        results: Vec<Passage>,
        source: RetrievalSource,
    ) -> Result<Uuid, CacheError> {
        let now = Utc::now();
        let persist;
        let id;

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            persist = state.config.persist_on_store;
            let capacity = state.config.capacity()?;
            let existing = state.best_match(assistant_id, query, now)?;

            let cache = state
                .assistants
                .entry(assistant_id.to_string())
                .or_insert_with(|| LruCache::new(capacity));

            let refreshed = existing.and_then(|(existing_id, _)| {
                let entry = cache.get_mut(&existing_id)?;
                entry.query_text = query_text.to_string();
                entry.query_vector = query.clone();
                entry.results = results.clone();
                entry.source = source;
                entry.created_at = now;
                entry.last_accessed_at = now;
                Some(existing_id)
            });

            id = match refreshed {
                Some(existing_id) => {
                    debug!("Refreshed cache entry {} for assistant {}", existing_id, assistant_id);
                    existing_id
                }
                None => {
                    let entry =
                        CacheEntry::new(assistant_id, query.clone(), query_text, results, source, now);
                    let new_id = entry.id;
                    if let Some((evicted_id, _)) = cache.push(new_id, entry) {
                        state.counters.evictions += 1;
                        debug!(
                            "Evicted least recently used entry {} for assistant {}",
                            evicted_id, assistant_id
                        );
                    }
                    new_id
                }
            };
        }

        if persist {
            self.flush().await.map_err(|e| {
                CacheError::Persistence(format!("Entry {} stored but not persisted: {}", id, e))
            })?;
        }

        Ok(id)
    }

    /// Removes every entry of the assistant, returning how many there were
    pub async fn clear_assistant_cache(&self, assistant_id: &str) -> usize {
        let removed = self
            .state
            .write()
            .await
            .assistants
            .remove(assistant_id)
            .map_or(0, |cache| cache.len());

        if removed > 0 {
            info!("Cleared {} cache entries for assistant {}", removed, assistant_id);
        }
        removed
    }

    /// Removes expired entries across all assistants
    ///
    /// Idempotent; safe to run concurrently with lookups and stores.
    pub async fn perform_maintenance(&self) -> MaintenanceReport {
        self.perform_maintenance_at(Utc::now()).await
    }

    pub async fn perform_maintenance_at(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut state = self.state.write().await;
        let ttl = state.config.ttl_seconds;
        let mut removed = 0usize;

        for cache in state.assistants.values_mut() {
            let expired: Vec<Uuid> = cache
                .iter()
                .filter(|(_, entry)| entry.is_expired(now, ttl))
                .map(|(id, _)| *id)
                .collect();

            for id in expired {
                cache.pop(&id);
                removed += 1;
            }
        }
        state.assistants.retain(|_, cache| !cache.is_empty());
        state.counters.expirations += removed as u64;

        let remaining = state.assistants.values().map(|cache| cache.len()).sum();
        if removed > 0 {
            info!("Cache maintenance removed {} expired entries, {} remain", removed, remaining);
        }

        MaintenanceReport {
            removed_count: removed,
            remaining_count: remaining,
        }
    }

    /// Feeds the end-to-end latency of one query into the hit/full averages
    pub async fn record_query_latency(&self, from_cache: bool, latency_ms: f64) {
        let mut state = self.state.write().await;
        if from_cache {
            state.counters.hit_latency.record(latency_ms);
        } else {
            state.counters.full_latency.record(latency_ms);
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let mut stats = state.counters.snapshot();

        for (assistant_id, cache) in &state.assistants {
            stats.entries_by_assistant.insert(assistant_id.clone(), cache.len());
            stats.total_entries += cache.len();

            for (_, entry) in cache.iter() {
                if stats.oldest_entry.map_or(true, |oldest| entry.created_at < oldest) {
                    stats.oldest_entry = Some(entry.created_at);
                }
                if stats.newest_entry.map_or(true, |newest| entry.created_at > newest) {
                    stats.newest_entry = Some(entry.created_at);
                }
            }
        }

        stats
    }

    /// Zeroes the counters; stored entries are kept
    pub async fn reset_stats(&self) {
        self.state.write().await.counters = StatsCounters::default();
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.assistants.values().map(|c| c.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Loads persisted entries, skipping expired or malformed ones
    ///
    /// Returns the number of entries restored. Without a persistence handle
    /// this is a no-op.
    pub async fn restore(&self) -> Result<usize, CacheError> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };

        let entries = persistence.load().await?;
        let now = Utc::now();
        let mut state = self.state.write().await;
        let capacity = state.config.capacity()?;
        let ttl = state.config.ttl_seconds;
        let mut restored = 0usize;

        for entry in entries {
            if entry.is_expired(now, ttl) {
                continue;
            }

            let cache = state
                .assistants
                .entry(entry.assistant_id.clone())
                .or_insert_with(|| LruCache::new(capacity));

            let dimension_ok = cache
                .peek_lru()
                .map_or(true, |(_, existing)| {
                    existing.query_vector.dimension() == entry.query_vector.dimension()
                });
            if !dimension_ok {
                warn!(
                    "Skipping persisted cache entry {} with mismatched dimension",
                    entry.id
                );
                continue;
            }

            cache.push(entry.id, entry);
            restored += 1;
        }
        state.assistants.retain(|_, cache| !cache.is_empty());

        info!("Restored {} cache entries", restored);
        Ok(restored)
    }

    /// Writes every entry through the persistence handle
    ///
    /// Returns the number of entries written; 0 without a handle.
    pub async fn flush(&self) -> Result<usize, CacheError> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };

        let _flushing = self.flush_lock.lock().await;
        let entries = self.state.read().await.snapshot_entries();
        persistence.save(&entries).await?;
        Ok(entries.len())
    }
}
