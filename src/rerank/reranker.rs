// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Reranker service
//!
//! Loads the cross-encoder once, on first use, trying the accelerated
//! execution path before the CPU one. If both fail the reranker is unusable
//! and every call reports one error naming both causes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{CrossEncoderModel, OnnxCrossEncoder};
use crate::models::{
    ExecutionPath, LazyModel, LoadProgress, LoadStage, ModelSource, ProgressCallback,
    ProgressReporter,
};
use crate::rag::errors::{ModelError, RagError};
use crate::rag::types::Passage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub model_id: String,
    pub model_file: String,
    pub tokenizer_file: String,
    pub model_dir: Option<PathBuf>,
    /// Tokens per (query, passage) pair
    pub max_length: usize,
    /// Try CUDA before CPU
    pub prefer_accelerated: bool,
    /// Passages kept after reranking
    pub top_k: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_id: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            model_file: "onnx/model.onnx".to_string(),
            tokenizer_file: "tokenizer.json".to_string(),
            model_dir: None,
            max_length: 512,
            prefer_accelerated: true,
            top_k: 5,
        }
    }
}

impl RerankerConfig {
    pub fn model_source(&self) -> ModelSource {
        ModelSource {
            model_id: self.model_id.clone(),
            model_file: self.model_file.clone(),
            tokenizer_file: self.tokenizer_file.clone(),
            model_dir: self.model_dir.clone(),
        }
    }
}

/// Produces a cross-encoder bound to one execution path
#[async_trait]
pub trait CrossEncoderLoader: Send + Sync {
    async fn load(
        &self,
        path: ExecutionPath,
        progress: &ProgressReporter,
    ) -> anyhow::Result<Arc<dyn CrossEncoderModel>>;
}

#[derive(Debug, Clone)]
pub struct OnnxCrossEncoderLoader {
    source: ModelSource,
    max_length: usize,
}

impl OnnxCrossEncoderLoader {
    pub fn new(config: &RerankerConfig) -> Self {
        Self {
            source: config.model_source(),
            max_length: config.max_length,
        }
    }
}

#[async_trait]
impl CrossEncoderLoader for OnnxCrossEncoderLoader {
    async fn load(
        &self,
        path: ExecutionPath,
        progress: &ProgressReporter,
    ) -> anyhow::Result<Arc<dyn CrossEncoderModel>> {
        let source = self.source.clone();
        let max_length = self.max_length;
        let progress = progress.clone();

        let model = tokio::task::spawn_blocking(move || {
            let files = source.resolve(&progress)?;
            progress.report(LoadStage::Loading, 0.7);
            OnnxCrossEncoder::new(
                source.model_id.clone(),
                files.model,
                files.tokenizer,
                max_length,
                path,
            )
        })
        .await??;

        Ok(Arc::new(model))
    }
}

pub struct Reranker {
    model_id: String,
    prefer_accelerated: bool,
    enabled: AtomicBool,
    loader: Arc<dyn CrossEncoderLoader>,
    model: LazyModel<dyn CrossEncoderModel>,
    progress: ProgressReporter,
}

impl Reranker {
    pub fn new(
        config: &RerankerConfig,
        loader: Arc<dyn CrossEncoderLoader>,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            model_id: config.model_id.clone(),
            prefer_accelerated: config.prefer_accelerated,
            enabled: AtomicBool::new(config.enabled),
            loader,
            model: LazyModel::new(config.model_id.clone()),
            progress: ProgressReporter::new(config.model_id.clone(), on_progress),
        }
    }

    pub fn onnx(config: &RerankerConfig, on_progress: Option<ProgressCallback>) -> Self {
        Self::new(config, Arc::new(OnnxCrossEncoderLoader::new(config)), on_progress)
    }

    pub fn model_name(&self) -> &str {
        &self.model_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turns reranking on or off; a disabled reranker passes candidates through
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<LoadProgress>> {
        self.progress.subscribe()
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.loaded().await.is_some()
    }

    /// Execution path of the loaded model, if loaded
    pub async fn execution_path(&self) -> Option<ExecutionPath> {
        self.model.loaded().await.map(|model| model.execution_path())
    }

    pub async fn ensure_loaded(&self) -> Result<(), RagError> {
        self.model().await.map(|_| ()).map_err(RagError::RerankModel)
    }

    /// Re-scores `passages` against `query`, best first, at most `top_k`
    ///
    /// Every returned passage carries a `relevance_score` in [0, 1]. When
    /// reranking is disabled, or there is nothing to rank, the passages are
    /// returned in their original order, truncated, and the model is never
    /// loaded.
    pub async fn rerank(
        &self,
        query: &str,
        passages: Vec<Passage>,
        top_k: usize,
    ) -> Result<Vec<Passage>, RagError> {
        if !self.is_enabled() || passages.is_empty() {
            return Ok(pass_through(passages, top_k));
        }

        let model = self.model().await.map_err(RagError::RerankModel)?;
        let query = query.to_string();
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let model_name = self.model_id.clone();

        let inference_error = |reason: String| {
            RagError::RerankModel(ModelError::Inference {
                model: model_name.clone(),
                reason,
            })
        };

        let logits = tokio::task::spawn_blocking(move || model.score_pairs(&query, &texts))
            .await
            .map_err(|e| inference_error(e.to_string()))?
            .map_err(|e| inference_error(format!("{:#}", e)))?;

        let mut scored: Vec<Passage> = passages
            .into_iter()
            .enumerate()
            .map(|(i, mut passage)| {
                let score = logits
                    .get(i)
                    .copied()
                    .flatten()
                    .map(sigmoid)
                    .filter(|s| s.is_finite())
                    .unwrap_or(0.0);
                passage.relevance_score = Some(score);
                passage
            })
            .collect();

        // Stable: equal scores keep retrieval order
        scored.sort_by(|a, b| {
            let a = a.relevance_score.unwrap_or(0.0);
            let b = b.relevance_score.unwrap_or(0.0);
            b.total_cmp(&a)
        });
        scored.truncate(top_k);

        debug!("Reranked {} passages, kept {}", logits.len(), scored.len());
        Ok(scored)
    }

    async fn model(&self) -> Result<Arc<dyn CrossEncoderModel>, ModelError> {
        let loader = self.loader.clone();
        let progress = self.progress.clone();
        let model_name = self.model_id.clone();
        let prefer_accelerated = self.prefer_accelerated;

        self.model
            .get_or_load(move || async move {
                progress.report(LoadStage::Initiated, 0.0);
                let result =
                    load_with_fallback(loader.as_ref(), &progress, &model_name, prefer_accelerated)
                        .await;

                match &result {
                    Ok(model) => {
                        info!(
                            "Cross-encoder {} ready on {} path",
                            model_name,
                            model.execution_path()
                        );
                        progress.report(LoadStage::Ready, 1.0);
                    }
                    Err(e) => {
                        error!("{}", e);
                        progress.report(LoadStage::Failed, 1.0);
                    }
                }
                result
            })
            .await
    }
}

async fn load_with_fallback(
    loader: &dyn CrossEncoderLoader,
    progress: &ProgressReporter,
    model_name: &str,
    prefer_accelerated: bool,
) -> Result<Arc<dyn CrossEncoderModel>, ModelError> {
    if !prefer_accelerated {
        return loader
            .load(ExecutionPath::Cpu, progress)
            .await
            .map_err(|e| ModelError::LoadFailed {
                model: model_name.to_string(),
                reason: format!("{:#}", e),
            });
    }

    info!("Loading cross-encoder {} on accelerated path", model_name);
    let accelerated = match loader.load(ExecutionPath::Accelerated, progress).await {
        Ok(model) => return Ok(model),
        Err(e) => e,
    };

    warn!(
        "Accelerated path failed for {}: {:#}; falling back to CPU",
        model_name, accelerated
    );
    loader
        .load(ExecutionPath::Cpu, progress)
        .await
        .map_err(|cpu| ModelError::AllExecutionPathsFailed {
            model: model_name.to_string(),
            accelerated: format!("{:#}", accelerated),
            cpu: format!("{:#}", cpu),
        })
}

/// Logistic function mapping a logit to [0, 1]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Candidates in their original order, truncated, scores untouched
pub fn pass_through(mut passages: Vec<Passage>, top_k: usize) -> Vec<Passage> {
    passages.truncate(top_k);
    passages
}
