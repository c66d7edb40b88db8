// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model file resolution
//!
//! Files come from a local directory when one is configured, otherwise from
//! the Hugging Face Hub cache (downloading on first use).

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use std::path::{Path, PathBuf};
use tracing::info;

use super::progress::{LoadStage, ProgressReporter};

/// Where to find a model and its tokenizer
#[derive(Debug, Clone)]
pub struct ModelSource {
    /// Hugging Face repository id, e.g. "nomic-ai/nomic-embed-text-v1.5"
    pub model_id: String,
    /// ONNX file path relative to the repository root
    pub model_file: String,
    pub tokenizer_file: String,
    /// Local directory holding `model_file` and `tokenizer_file`
    pub model_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelSource {
    /// Resolves both files, reporting `Downloading` progress
    ///
    /// Blocking: call from `spawn_blocking`.
    pub fn resolve(&self, progress: &ProgressReporter) -> Result<ModelFiles> {
        match &self.model_dir {
            Some(dir) => self.resolve_local(dir),
            None => self.resolve_hub(progress),
        }
    }

    fn resolve_local(&self, dir: &Path) -> Result<ModelFiles> {
        let model = dir.join(&self.model_file);
        let tokenizer = dir.join(&self.tokenizer_file);

        if !model.exists() {
            anyhow::bail!("ONNX model file not found: {}", model.display());
        }
        if !tokenizer.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer.display());
        }

        Ok(ModelFiles { model, tokenizer })
    }

    fn resolve_hub(&self, progress: &ProgressReporter) -> Result<ModelFiles> {
        info!("Resolving {} from Hugging Face Hub", self.model_id);
        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.model(self.model_id.clone());

        progress.report(LoadStage::Downloading, 0.1);
        let tokenizer = repo
            .get(&self.tokenizer_file)
            .context(format!("Failed to download {}", self.tokenizer_file))?;

        progress.report(LoadStage::Downloading, 0.3);
        let model = repo
            .get(&self.model_file)
            .context(format!("Failed to download {}", self.model_file))?;

        progress.report(LoadStage::Downloading, 0.6);
        Ok(ModelFiles { model, tokenizer })
    }
}
