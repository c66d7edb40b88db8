// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Embedding engine
//!
//! Holds the embedding model behind a [`LazyModel`], so the model is loaded at
//! most once per engine no matter how many queries arrive while it loads. A
//! failed load sticks to the engine: build a new engine to retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use super::{EmbeddingModel, OnnxEmbeddingModel};
use crate::models::{
    LazyModel, LoadProgress, LoadStage, ModelSource, ProgressCallback, ProgressReporter,
};
use crate::rag::errors::{ModelError, RagError};
use crate::vector::{QueryVector, VectorError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Hugging Face repository id
    pub model_id: String,
    pub model_file: String,
    pub tokenizer_file: String,
    /// Load from this directory instead of the Hub cache
    pub model_dir: Option<PathBuf>,
    /// Expected output dimension; every vector in the pipeline has it
    pub dimension: usize,
    /// Tokens per input; longer text is truncated
    pub max_length: usize,
    pub query_prefix: String,
    pub document_prefix: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "nomic-ai/nomic-embed-text-v1.5".to_string(),
            model_file: "onnx/model.onnx".to_string(),
            tokenizer_file: "tokenizer.json".to_string(),
            model_dir: None,
            dimension: 768,
            max_length: 512,
            query_prefix: "search_query: ".to_string(),
            document_prefix: "search_document: ".to_string(),
        }
    }
}

impl EmbeddingConfig {
    pub fn model_source(&self) -> ModelSource {
        ModelSource {
            model_id: self.model_id.clone(),
            model_file: self.model_file.clone(),
            tokenizer_file: self.tokenizer_file.clone(),
            model_dir: self.model_dir.clone(),
        }
    }

    pub fn prefix(&self, role: EmbeddingRole) -> &str {
        match role {
            EmbeddingRole::Query => &self.query_prefix,
            EmbeddingRole::Document => &self.document_prefix,
        }
    }
}

/// Which side of retrieval the text is on
///
/// Asymmetric embedding models expect a different task prefix for queries
/// and for the passages they are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingRole {
    Query,
    Document,
}

/// Produces the embedding model on first use
#[async_trait]
pub trait EmbeddingModelLoader: Send + Sync {
    async fn load(&self, progress: &ProgressReporter) -> anyhow::Result<Arc<dyn EmbeddingModel>>;
}

/// Resolves model files (local or Hub) and loads them with ONNX Runtime
#[derive(Debug, Clone)]
pub struct OnnxEmbeddingLoader {
    source: ModelSource,
    max_length: usize,
}

impl OnnxEmbeddingLoader {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            source: config.model_source(),
            max_length: config.max_length,
        }
    }
}

#[async_trait]
impl EmbeddingModelLoader for OnnxEmbeddingLoader {
    async fn load(&self, progress: &ProgressReporter) -> anyhow::Result<Arc<dyn EmbeddingModel>> {
        let source = self.source.clone();
        let max_length = self.max_length;
        let progress = progress.clone();

        let model = tokio::task::spawn_blocking(move || {
            let files = source.resolve(&progress)?;
            progress.report(LoadStage::Loading, 0.7);
            OnnxEmbeddingModel::new(source.model_id.clone(), files.model, files.tokenizer, max_length)
        })
        .await??;

        Ok(Arc::new(model))
    }
}

pub struct EmbeddingEngine {
    config: EmbeddingConfig,
    loader: Arc<dyn EmbeddingModelLoader>,
    model: LazyModel<dyn EmbeddingModel>,
    progress: ProgressReporter,
}

impl EmbeddingEngine {
    pub fn new(
        config: EmbeddingConfig,
        loader: Arc<dyn EmbeddingModelLoader>,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        let progress = ProgressReporter::new(config.model_id.clone(), on_progress);
        Self {
            model: LazyModel::new(config.model_id.clone()),
            config,
            loader,
            progress,
        }
    }

    /// Engine backed by the ONNX loader for `config`
    pub fn onnx(config: EmbeddingConfig, on_progress: Option<ProgressCallback>) -> Self {
        let loader = Arc::new(OnnxEmbeddingLoader::new(&config));
        Self::new(config, loader, on_progress)
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_id
    }

    /// Receiver for loading milestones; dropping it never affects the load
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<LoadProgress>> {
        self.progress.subscribe()
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.loaded().await.is_some()
    }

    /// Loads the model now instead of on the first query
    pub async fn ensure_loaded(&self) -> Result<(), RagError> {
        self.model().await.map(|_| ()).map_err(RagError::EmbeddingModel)
    }

    /// Embeds one text into a normalized vector
    ///
    /// # Errors
    /// - `RagError::EmptyInput` if `text` is blank
    /// - `RagError::EmbeddingModel` if the model failed to load or run
    /// - `RagError::Vector` if the model produced a degenerate vector
    pub async fn embed(&self, text: &str, role: EmbeddingRole) -> Result<QueryVector, RagError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RagError::EmptyInput);
        }

        let mut vectors = self.embed_prepared(vec![self.prepare(trimmed, role)]).await?;
        vectors.pop().ok_or_else(|| {
            RagError::EmbeddingModel(ModelError::Inference {
                model: self.config.model_id.clone(),
                reason: "model returned no vector".to_string(),
            })
        })
    }

    /// Embeds several texts in one forward pass, preserving order
    ///
    /// An empty slice returns an empty vec without loading the model.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        role: EmbeddingRole,
    ) -> Result<Vec<QueryVector>, RagError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut prepared = Vec::with_capacity(texts.len());
        for text in texts {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(RagError::EmptyInput);
            }
            prepared.push(self.prepare(trimmed, role));
        }

        self.embed_prepared(prepared).await
    }

    fn prepare(&self, text: &str, role: EmbeddingRole) -> String {
        format!("{}{}", self.config.prefix(role), text)
    }

    async fn embed_prepared(&self, texts: Vec<String>) -> Result<Vec<QueryVector>, RagError> {
        let model = self.model().await.map_err(RagError::EmbeddingModel)?;
        let expected = texts.len();
        let model_name = self.config.model_id.clone();

        let inference_error = |reason: String| {
            RagError::EmbeddingModel(ModelError::Inference {
                model: model_name.clone(),
                reason,
            })
        };

        let raw = tokio::task::spawn_blocking(move || model.embed_batch(&texts))
            .await
            .map_err(|e| inference_error(e.to_string()))?
            .map_err(|e| inference_error(format!("{:#}", e)))?;

        if raw.len() != expected {
            return Err(inference_error(format!(
                "expected {} vectors, got {}",
                expected,
                raw.len()
            )));
        }

        raw.into_iter()
            .map(|values| {
                if values.len() != self.config.dimension {
                    return Err(VectorError::DimensionMismatch {
                        expected: self.config.dimension,
                        actual: values.len(),
                    }
                    .into());
                }
                QueryVector::normalized(values).map_err(RagError::from)
            })
            .collect()
    }

    async fn model(&self) -> Result<Arc<dyn EmbeddingModel>, ModelError> {
        let loader = self.loader.clone();
        let progress = self.progress.clone();
        let model_name = self.config.model_id.clone();
        let expected_dimension = self.config.dimension;

        self.model
            .get_or_load(move || async move {
                info!("Loading embedding model {}", model_name);
                progress.report(LoadStage::Initiated, 0.0);

                let result = match loader.load(&progress).await {
                    Ok(model) if model.dimension() != expected_dimension => Err(ModelError::LoadFailed {
                        model: model_name.clone(),
                        reason: format!(
                            "dimension mismatch: expected {}, got {}",
                            expected_dimension,
                            model.dimension()
                        ),
                    }),
                    Ok(model) => Ok(model),
                    Err(e) => Err(ModelError::LoadFailed {
                        model: model_name.clone(),
                        reason: format!("{:#}", e),
                    }),
                };

                match &result {
                    Ok(model) => {
                        info!(
                            "Embedding model {} ready ({} dimensions)",
                            model.model_name(),
                            model.dimension()
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
