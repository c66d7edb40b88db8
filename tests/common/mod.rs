// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Shared fakes for integration tests: deterministic models and scripted backends
#![allow(dead_code)]

use async_trait::async_trait;
use fabstir_rag_core::cache::SemanticCache;
use fabstir_rag_core::config::RagConfig;
use fabstir_rag_core::embeddings::{
    EmbeddingConfig, EmbeddingEngine, EmbeddingModel, EmbeddingModelLoader,
};
use fabstir_rag_core::models::{ExecutionPath, LoadStage, ProgressReporter};
use fabstir_rag_core::rag::RagQueryOrchestrator;
use fabstir_rag_core::rerank::{CrossEncoderLoader, CrossEncoderModel, Reranker, RerankerConfig};
use fabstir_rag_core::vector::{
    cosine_similarity, LocalPassageStore, QueryVector, RemoteBackendError, RemoteMatch,
    RemoteThenLocal, RemoteVectorBackend, VectorRetriever,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Topic keywords; each topic owns one dimension
const TOPICS: &[&[&str]] = &[
    &["cat", "cats", "kitten", "kittens", "feline", "purr"],
    &["pasta", "spaghetti", "noodles", "italian", "sauce", "boil"],
    &[
        "neural", "network", "networks", "machine", "learning", "algorithms", "gradient", "model",
    ],
    &["weather", "rain", "sunny", "forecast", "storm"],
];

/// Dimension of [`KeywordEmbeddingModel`] vectors
pub const TEST_DIMENSION: usize = 5;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Embeds text by counting topic keywords, plus a small constant component
/// so unrelated text still has a non-zero vector
pub struct KeywordEmbeddingModel;

impl KeywordEmbeddingModel {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; TEST_DIMENSION];
        for word in words(text) {
            for (dim, keywords) in TOPICS.iter().enumerate() {
                if keywords.contains(&word.as_str()) {
                    v[dim] += 1.0;
                }
            }
        }
        v[TEST_DIMENSION - 1] = 0.1;
        v
    }
}

impl EmbeddingModel for KeywordEmbeddingModel {
    fn model_name(&self) -> &str {
        "test/keyword-embedder"
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

pub fn test_embedding_config() -> EmbeddingConfig {
    EmbeddingConfig {
        model_id: "test/keyword-embedder".to_string(),
        dimension: TEST_DIMENSION,
        ..Default::default()
    }
}

/// Loader that counts calls and optionally waits or fails
#[derive(Default)]
pub struct CountingEmbeddingLoader {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub fail_with: Option<String>,
}

impl CountingEmbeddingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingModelLoader for CountingEmbeddingLoader {
    async fn load(&self, progress: &ProgressReporter) -> anyhow::Result<Arc<dyn EmbeddingModel>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress.report(LoadStage::Loading, 0.5);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(reason) = &self.fail_with {
            anyhow::bail!("{}", reason);
        }
        Ok(Arc::new(KeywordEmbeddingModel))
    }
}

pub fn test_embedder() -> (Arc<EmbeddingEngine>, Arc<CountingEmbeddingLoader>) {
    let loader = Arc::new(CountingEmbeddingLoader::new());
    let engine = EmbeddingEngine::new(test_embedding_config(), loader.clone(), None);
    (Arc::new(engine), loader)
}

/// Scores a pair by how many query words (longer than three letters) occur
/// in the passage
pub struct KeywordCrossEncoder {
    pub path: ExecutionPath,
}

impl CrossEncoderModel for KeywordCrossEncoder {
    fn model_name(&self) -> &str {
        "test/keyword-cross-encoder"
    }

    fn execution_path(&self) -> ExecutionPath {
        self.path
    }

    fn score_pairs(&self, query: &str, passages: &[String]) -> anyhow::Result<Vec<Option<f32>>> {
        let query_words: Vec<String> = words(query).filter(|w| w.len() > 3).collect();
        Ok(passages
            .iter()
            .map(|passage| {
                let passage_words: Vec<String> = words(passage).collect();
                let overlap = query_words
                    .iter()
                    .filter(|w| passage_words.contains(w))
                    .count();
                Some(overlap as f32 * 2.0 - 1.0)
            })
            .collect())
    }
}

/// Cross-encoder loader with scripted per-path failures
#[derive(Default)]
pub struct ScriptedCrossEncoderLoader {
    pub fail_accelerated: bool,
    pub fail_cpu: bool,
    pub attempts: Mutex<Vec<ExecutionPath>>,
}

impl ScriptedCrossEncoderLoader {
    pub fn working() -> Self {
        Self::default()
    }

    pub fn without_accelerator() -> Self {
        Self {
            fail_accelerated: true,
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_accelerated: true,
            fail_cpu: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> Vec<ExecutionPath> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrossEncoderLoader for ScriptedCrossEncoderLoader {
    async fn load(
        &self,
        path: ExecutionPath,
        _progress: &ProgressReporter,
    ) -> anyhow::Result<Arc<dyn CrossEncoderModel>> {
        self.attempts.lock().unwrap().push(path);
        let fails = match path {
            ExecutionPath::Accelerated => self.fail_accelerated,
            ExecutionPath::Cpu => self.fail_cpu,
        };
        if fails {
            anyhow::bail!("{} provider unavailable", path);
        }
        Ok(Arc::new(KeywordCrossEncoder { path }))
    }
}

pub fn test_reranker_config() -> RerankerConfig {
    RerankerConfig {
        model_id: "test/keyword-cross-encoder".to_string(),
        top_k: 3,
        ..Default::default()
    }
}

pub fn test_reranker(loader: Arc<ScriptedCrossEncoderLoader>) -> Arc<Reranker> {
    Arc::new(Reranker::new(&test_reranker_config(), loader, None))
}

/// Remote backend that serves scripted rows and records every call
#[derive(Default)]
pub struct RecordingBackend {
    rows: Mutex<HashMap<String, Vec<(String, String, Vec<f32>)>>>,
    pub searches: AtomicUsize,
    pub upserts: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn add(&self, assistant_id: &str, source_id: &str, text: &str) {
        self.rows
            .lock()
            .unwrap()
            .entry(assistant_id.to_string())
            .or_default()
            .push((
                source_id.to_string(),
                text.to_string(),
                KeywordEmbeddingModel::vector(text),
            ));
    }
}

#[async_trait]
impl RemoteVectorBackend for RecordingBackend {
    async fn search(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        top_k: usize,
    ) -> Result<Vec<RemoteMatch>, RemoteBackendError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().unwrap();
        let mut matches: Vec<RemoteMatch> = rows
            .get(assistant_id)
            .map(|rows| {
                rows.iter()
                    .map(|(source_id, text, vector)| RemoteMatch {
                        text: text.clone(),
                        source_id: source_id.clone(),
                        similarity: cosine_similarity(query.as_slice(), vector),
                    })
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn upsert_vector(
        &self,
        _source_id: &str,
        _assistant_id: &str,
        _text: &str,
        _vector: &QueryVector,
    ) -> Result<(), RemoteBackendError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Remote backend whose every call fails
pub struct ErroringBackend;

#[async_trait]
impl RemoteVectorBackend for ErroringBackend {
    async fn search(
        &self,
        _assistant_id: &str,
        _query: &QueryVector,
        _top_k: usize,
    ) -> Result<Vec<RemoteMatch>, RemoteBackendError> {
        Err(RemoteBackendError::Status {
            status: 503,
            body: "service unavailable".to_string(),
        })
    }

    async fn upsert_vector(
        &self,
        _source_id: &str,
        _assistant_id: &str,
        _text: &str,
        _vector: &QueryVector,
    ) -> Result<(), RemoteBackendError> {
        Err(RemoteBackendError::Status {
            status: 503,
            body: "service unavailable".to_string(),
        })
    }
}

/// Remote backend that never answers within any reasonable timeout
pub struct HangingBackend;

#[async_trait]
impl RemoteVectorBackend for HangingBackend {
    async fn search(
        &self,
        _assistant_id: &str,
        _query: &QueryVector,
        _top_k: usize,
    ) -> Result<Vec<RemoteMatch>, RemoteBackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![])
    }

    async fn upsert_vector(
        &self,
        _source_id: &str,
        _assistant_id: &str,
        _text: &str,
        _vector: &QueryVector,
    ) -> Result<(), RemoteBackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

pub const CATS: &str = "Cats are small carnivorous mammals; a kitten learns to purr early.";
pub const PASTA: &str = "Boil the spaghetti in salted water and toss the pasta with tomato sauce.";
pub const NEURAL: &str =
    "Neural networks are machine learning models trained with gradient descent algorithms.";

/// Pipeline configuration matching the test models
pub fn test_rag_config() -> RagConfig {
    RagConfig {
        embedding: test_embedding_config(),
        reranker: test_reranker_config(),
        ..Default::default()
    }
}

/// An orchestrator wired to the test models and the given backends
pub struct TestPipeline {
    pub orchestrator: RagQueryOrchestrator,
    pub embedding_loader: Arc<CountingEmbeddingLoader>,
    pub reranker_loader: Arc<ScriptedCrossEncoderLoader>,
}

pub fn build_pipeline(
    remote: Option<Arc<dyn RemoteVectorBackend>>,
    reranker_loader: ScriptedCrossEncoderLoader,
    embedding_loader: CountingEmbeddingLoader,
    config: &RagConfig,
) -> TestPipeline {
    let embedding_loader = Arc::new(embedding_loader);
    let reranker_loader = Arc::new(reranker_loader);

    let embedder = Arc::new(EmbeddingEngine::new(
        config.embedding.clone(),
        embedding_loader.clone(),
        None,
    ));
    let reranker = Arc::new(Reranker::new(&config.reranker, reranker_loader.clone(), None));
    let retriever = Arc::new(VectorRetriever::new(
        RemoteThenLocal::new(remote, Arc::new(LocalPassageStore::new())),
        config.retrieval.clone(),
    ));
    let cache = Arc::new(SemanticCache::new(config.cache.clone()).unwrap());

    TestPipeline {
        orchestrator: RagQueryOrchestrator::new(embedder, retriever, reranker, cache, config),
        embedding_loader,
        reranker_loader,
    }
}

/// Working models, the given remote backend, default settings
pub fn default_pipeline(remote: Option<Arc<dyn RemoteVectorBackend>>) -> TestPipeline {
    build_pipeline(
        remote,
        ScriptedCrossEncoderLoader::working(),
        CountingEmbeddingLoader::new(),
        &test_rag_config(),
    )
}
