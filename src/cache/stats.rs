// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cache telemetry for the lifetime of the process (until reset)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_queries: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Average end-to-end latency of queries answered from the cache
    pub avg_hit_latency_ms: f64,
    /// Average end-to-end latency of queries that ran the full pipeline
    pub avg_full_latency_ms: f64,
    pub entries_by_assistant: HashMap<String, usize>,
    pub total_entries: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    /// Entries dropped by per-assistant capacity
    pub evictions: u64,
    /// Entries dropped by TTL
    pub expirations: u64,
}

/// Running counters; entry-derived fields are filled in at snapshot time
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsCounters {
    pub hits: u64,
    pub misses: u64,
    pub hit_latency: RollingAverage,
    pub full_latency: RollingAverage,
    pub evictions: u64,
    pub expirations: u64,
}

impl StatsCounters {
    pub fn snapshot(&self) -> CacheStats {
        let total_queries = self.hits + self.misses;
        let hit_rate = if total_queries == 0 {
            0.0
        } else {
            self.hits as f64 / total_queries as f64
        };

        CacheStats {
            total_queries,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
            avg_hit_latency_ms: self.hit_latency.value(),
            avg_full_latency_ms: self.full_latency.value(),
            evictions: self.evictions,
            expirations: self.expirations,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RollingAverage {
    count: u64,
    mean: f64,
}

impl RollingAverage {
    pub fn record(&mut self, sample: f64) {
        self.count += 1;
        self.mean = (self.mean * (self.count - 1) as f64 + sample) / self.count as f64;
    }

    pub fn value(&self) -> f64 {
        self.mean
    }
}

/// Outcome of one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub removed_count: usize,
    pub remaining_count: usize,
}
