// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cache persistence
//!
//! Entries are saved per assistant in least- to most-recently-used order, so
//! restoring them in file order rebuilds the same LRU ordering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{CacheEntry, CacheError};

const SNAPSHOT_VERSION: u32 = 1;

#[async_trait]
pub trait CachePersistence: Send + Sync {
    async fn load(&self) -> Result<Vec<CacheEntry>, CacheError>;

    async fn save(&self, entries: &[CacheEntry]) -> Result<(), CacheError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<CacheEntry>,
}

/// Whole-cache JSON file, replaced atomically on each save
///
/// Saves through clones of one handle are serialized.
#[derive(Debug, Clone)]
pub struct JsonFileCachePersistence {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileCachePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Sibling of the snapshot, unique per save
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache.json".to_string());
        self.path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CachePersistence for JsonFileCachePersistence {
    async fn load(&self) -> Result<Vec<CacheEntry>, CacheError> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!("No cache snapshot at {}", self.path.display());
            return Ok(vec![]);
        }

        let bytes = tokio::fs::read(&self.path).await?;
        let snapshot: CacheSnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CacheError::Persistence(format!(
                "Unsupported cache snapshot version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }

        Ok(snapshot.entries)
    }

    async fn save(&self, entries: &[CacheEntry]) -> Result<(), CacheError> {
        let snapshot = CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            entries: entries.to_vec(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let _writing = self.write_lock.lock().await;
        let tmp = self.temp_path();
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Saved {} cache entries to {}", entries.len(), self.path.display());
        Ok(())
    }
}
