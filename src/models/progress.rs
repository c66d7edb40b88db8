// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model loading progress
//!
//! Loaders report milestones through a [`ProgressReporter`]. Each report goes
//! to the optional callback given at construction and to a `watch` channel,
//! so any number of callers can observe loading (or stop observing) without
//! influencing it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    Initiated,
    Downloading,
    Loading,
    Ready,
    Failed,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadStage::Initiated => "initiated",
            LoadStage::Downloading => "downloading",
            LoadStage::Loading => "loading",
            LoadStage::Ready => "ready",
            LoadStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A single progress milestone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    pub stage: LoadStage,
    /// Fraction complete in [0, 1]
    pub fraction: f32,
    pub model_name: String,
}

/// Callback invoked at each loading milestone
pub type ProgressCallback = Arc<dyn Fn(&LoadProgress) + Send + Sync>;

#[derive(Clone)]
pub struct ProgressReporter {
    model_name: String,
    callback: Option<ProgressCallback>,
    sender: Arc<watch::Sender<Option<LoadProgress>>>,
}

impl ProgressReporter {
    pub fn new(model_name: impl Into<String>, callback: Option<ProgressCallback>) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            model_name: model_name.into(),
            callback,
            sender: Arc::new(sender),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn report(&self, stage: LoadStage, fraction: f32) {
        let progress = LoadProgress {
            stage,
            fraction: fraction.clamp(0.0, 1.0),
            model_name: self.model_name.clone(),
        };

        if let Some(callback) = &self.callback {
            callback(&progress);
        }

        // send_replace never fails, even with no receivers
        self.sender.send_replace(Some(progress));
    }

    /// Receiver for the latest milestone; `None` until loading starts
    pub fn subscribe(&self) -> watch::Receiver<Option<LoadProgress>> {
        self.sender.subscribe()
    }

    pub fn latest(&self) -> Option<LoadProgress> {
        self.sender.borrow().clone()
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("model_name", &self.model_name)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
