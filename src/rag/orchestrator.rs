// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Query orchestration
//!
//! One query runs these stages strictly in order:
//!
//! ```text
//! Embedding -> CacheCheck -> Done                       (hit)
//!                         -> Retrieving -> Filtering
//!                            -> Reranking -> Caching -> Done   (miss)
//! ```
//!
//! Only an embedding failure or a reranker that failed on every execution
//! path ends a query with an error. Remote backend trouble degrades to the
//! local store inside retrieval, and cache trouble degrades to a miss
//! without a store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::context::{ContextBuilder, ContextConfig};
use super::errors::RagError;
use super::types::{Passage, RetrievalSource};
use crate::cache::{CacheHit, JsonFileCachePersistence, SemanticCache};
use crate::config::RagConfig;
use crate::embeddings::{EmbeddingEngine, EmbeddingRole};
use crate::models::ProgressCallback;
use crate::rerank::Reranker;
use crate::vector::{build_remote_backend, LocalPassageStore, RemoteThenLocal, VectorRetriever};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Embedding,
    CacheCheck,
    Retrieving,
    Filtering,
    Reranking,
    Caching,
    Done,
    Failed,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryStage::Embedding => "embedding",
            QueryStage::CacheCheck => "cache_check",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Filtering => "filtering",
            QueryStage::Reranking => "reranking",
            QueryStage::Caching => "caching",
            QueryStage::Done => "done",
            QueryStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Wall-clock time per stage, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub embedding_ms: f64,
    pub cache_ms: f64,
    pub retrieval_ms: f64,
    pub rerank_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    /// Assembled context; empty when nothing relevant was found
    pub context: String,
    pub passages: Vec<Passage>,
    pub source: RetrievalSource,
    pub from_cache: bool,
    /// Similarity to the cached query, on a hit
    pub cache_similarity: Option<f32>,
    /// Hit count of the cache entry after this hit
    pub cache_hit_count: Option<u64>,
    /// Rows from vector search before the similarity floor (0 on a hit)
    pub candidate_count: usize,
    /// Rows that survived the floor (0 on a hit)
    pub filtered_count: usize,
    pub context_truncated: bool,
    pub timings: StageTimings,
    /// Stages visited, in order
    pub stages: Vec<QueryStage>,
}

/// Per-query stage bookkeeping
struct StageTrail {
    query_id: String,
    stages: Vec<QueryStage>,
}

impl StageTrail {
    fn new(assistant_id: &str) -> Self {
        Self {
            query_id: format!("{}:{}", assistant_id, uuid::Uuid::new_v4()),
            stages: Vec::with_capacity(8),
        }
    }

    fn enter(&mut self, stage: QueryStage) {
        debug!("Query {} -> {}", self.query_id, stage);
        self.stages.push(stage);
    }

    fn fail(&mut self, error: &RagError) {
        let at = self.stages.last().copied();
        self.enter(QueryStage::Failed);
        if let Some(stage) = at {
            error!(
                "Query {} failed during {} [{}]: {}",
                self.query_id,
                stage,
                error.error_code(),
                error
            );
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Settings read once per query
#[derive(Debug, Clone)]
struct QuerySettings {
    rerank_top_k: usize,
    context: ContextConfig,
    invalidate_cache_on_ingest: bool,
}

pub struct RagQueryOrchestrator {
    embedder: Arc<EmbeddingEngine>,
    retriever: Arc<VectorRetriever>,
    reranker: Arc<Reranker>,
    cache: Arc<SemanticCache>,
    settings: RwLock<QuerySettings>,
}

impl RagQueryOrchestrator {
    pub fn new(
        embedder: Arc<EmbeddingEngine>,
        retriever: Arc<VectorRetriever>,
        reranker: Arc<Reranker>,
        cache: Arc<SemanticCache>,
        config: &RagConfig,
    ) -> Self {
        Self {
            embedder,
            retriever,
            reranker,
            cache,
            settings: RwLock::new(QuerySettings {
                rerank_top_k: config.reranker.top_k,
                context: config.context.clone(),
                invalidate_cache_on_ingest: config.ingest.invalidate_cache_on_ingest,
            }),
        }
    }

    /// Wires ONNX models, the configured remote backend, an empty local
    /// store and the cache (restored from disk when a path is configured)
    pub async fn from_config(
        config: &RagConfig,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Self, RagError> {
        config.validate()?;

        let embedder = Arc::new(EmbeddingEngine::onnx(
            config.embedding.clone(),
            on_progress.clone(),
        ));
        let reranker = Arc::new(Reranker::onnx(&config.reranker, on_progress));

        let remote = build_remote_backend(&config.remote)
            .map_err(|e| RagError::Config(e.to_string()))?;
        let retriever = Arc::new(VectorRetriever::new(
            RemoteThenLocal::new(Some(remote), Arc::new(LocalPassageStore::new())),
            config.retrieval.clone(),
        ));

        let mut cache = SemanticCache::new(config.cache.clone())
            .map_err(|e| RagError::Config(e.to_string()))?;
        if let Some(path) = &config.cache.persistence_path {
            cache = cache.with_persistence(Arc::new(JsonFileCachePersistence::new(path.clone())));
        }
        if let Err(e) = cache.restore().await {
            warn!("Could not restore semantic cache: {}", e);
        }

        Ok(Self::new(embedder, retriever, reranker, Arc::new(cache), config))
    }

    pub fn embedder(&self) -> &Arc<EmbeddingEngine> {
        &self.embedder
    }

    pub fn retriever(&self) -> &Arc<VectorRetriever> {
        &self.retriever
    }

    pub fn reranker(&self) -> &Arc<Reranker> {
        &self.reranker
    }

    pub fn cache(&self) -> &Arc<SemanticCache> {
        &self.cache
    }

    /// Applies runtime-adjustable settings
    ///
    /// Model identities (ids, files, dimension) are fixed at construction
    /// and ignored here.
    pub async fn update_config(&self, config: &RagConfig) -> Result<(), RagError> {
        config.validate()?;

        self.cache
            .update_config(config.cache.clone())
            .await
            .map_err(|e| RagError::Config(e.to_string()))?;
        self.retriever.update_config(config.retrieval.clone()).await;
        self.reranker.set_enabled(config.reranker.enabled);

        *self.settings.write().await = QuerySettings {
            rerank_top_k: config.reranker.top_k,
            context: config.context.clone(),
            invalidate_cache_on_ingest: config.ingest.invalidate_cache_on_ingest,
        };

        info!("Pipeline configuration updated");
        Ok(())
    }

    /// Answers `query_text` for `assistant_id` with a context string
    ///
    /// # Errors
    /// - `RagError::EmptyInput` for a blank query
    /// - `RagError::EmbeddingModel` if the query cannot be embedded
    /// - `RagError::RerankModel` if the reranker is enabled but unusable
    pub async fn query(&self, assistant_id: &str, query_text: &str) -> Result<RagResponse, RagError> {
        let start = Instant::now();
        let settings = self.settings.read().await.clone();
        let mut trail = StageTrail::new(assistant_id);
        let mut timings = StageTimings::default();

        trail.enter(QueryStage::Embedding);
        let stage_start = Instant::now();
        let query_vector = match self.embedder.embed(query_text, EmbeddingRole::Query).await {
            Ok(vector) => vector,
            Err(e) => {
                trail.fail(&e);
                return Err(e);
            }
        };
        timings.embedding_ms = elapsed_ms(stage_start);

        trail.enter(QueryStage::CacheCheck);
        let stage_start = Instant::now();
        let cache_enabled = self.cache.is_enabled().await;
        let mut store_allowed = cache_enabled;

        if cache_enabled {
            match self.cache.lookup(assistant_id, &query_vector, query_text).await {
                Ok(Some(hit)) => {
                    timings.cache_ms = elapsed_ms(stage_start);
                    return Ok(self.answer_from_cache(hit, &settings, trail, timings, start).await);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Cache lookup failed, continuing without cache: {}", e);
                    store_allowed = false;
                }
            }
        }
        timings.cache_ms = elapsed_ms(stage_start);

        trail.enter(QueryStage::Retrieving);
        let stage_start = Instant::now();
        let candidate_limit = self.retriever.config().await.candidate_limit;
        let outcome = self
            .retriever
            .retrieve_candidates(assistant_id, &query_vector, candidate_limit)
            .await;

        trail.enter(QueryStage::Filtering);
        let retrieval = self.retriever.filter(assistant_id, outcome, stage_start).await;
        timings.retrieval_ms = elapsed_ms(stage_start);

        trail.enter(QueryStage::Reranking);
        let stage_start = Instant::now();
        let passages = match self
            .reranker
            .rerank(query_text, retrieval.passages, settings.rerank_top_k)
            .await
        {
            Ok(passages) => passages,
            Err(e) => {
                trail.fail(&e);
                return Err(e);
            }
        };
        timings.rerank_ms = elapsed_ms(stage_start);

        // Nothing retrieved or nothing above the floor: later ingests must stay visible
        if store_allowed && !passages.is_empty() {
            trail.enter(QueryStage::Caching);
            if let Err(e) = self
                .cache
                .store(
                    assistant_id,
                    &query_vector,
                    query_text,
                    passages.clone(),
                    retrieval.source,
                )
                .await
            {
                warn!("Failed to cache results for assistant {}: {}", assistant_id, e);
            }
        }

        let context = ContextBuilder::with_config(settings.context).build(&passages);
        timings.total_ms = elapsed_ms(start);
        self.cache.record_query_latency(false, timings.total_ms).await;
        trail.enter(QueryStage::Done);

        info!(
            "Query {} answered from {} with {} passages ({} candidates, {} above floor) in {:.1}ms \
             [embed {:.1}ms, cache {:.1}ms, retrieve {:.1}ms, rerank {:.1}ms]",
            trail.query_id,
            retrieval.source,
            passages.len(),
            retrieval.candidate_count,
            retrieval.filtered_count,
            timings.total_ms,
            timings.embedding_ms,
            timings.cache_ms,
            timings.retrieval_ms,
            timings.rerank_ms
        );

        Ok(RagResponse {
            context: context.text,
            passages,
            source: retrieval.source,
            from_cache: false,
            cache_similarity: None,
            cache_hit_count: None,
            candidate_count: retrieval.candidate_count,
            filtered_count: retrieval.filtered_count,
            context_truncated: context.truncated,
            timings,
            stages: trail.stages,
        })
    }

    async fn answer_from_cache(
        &self,
        hit: CacheHit,
        settings: &QuerySettings,
        mut trail: StageTrail,
        mut timings: StageTimings,
        start: Instant,
    ) -> RagResponse {
        let context = ContextBuilder::with_config(settings.context.clone()).build(&hit.entry.results);
        timings.total_ms = elapsed_ms(start);
        self.cache.record_query_latency(true, timings.total_ms).await;
        trail.enter(QueryStage::Done);

        info!(
            "Query {} answered from cache (similarity {:.3}, hit #{}) in {:.1}ms",
            trail.query_id, hit.similarity, hit.entry.hit_count, timings.total_ms
        );

        RagResponse {
            context: context.text,
            passages: hit.entry.results,
            source: hit.entry.source,
            from_cache: true,
            cache_similarity: Some(hit.similarity),
            cache_hit_count: Some(hit.entry.hit_count),
            candidate_count: 0,
            filtered_count: 0,
            context_truncated: context.truncated,
            timings,
            stages: trail.stages,
        }
    }

    /// Adds one passage to the assistant's knowledge
    ///
    /// The passage is embedded with the document role and inserted into the
    /// local store. The remote upsert is best effort: a failure is logged and
    /// the local copy still serves as fallback; it is bounded by the
    /// retrieval `remote_timeout_ms`. With
    /// `invalidate_cache_on_ingest` the assistant's cache is cleared.
    pub async fn index_passage(
        &self,
        assistant_id: &str,
        source_id: &str,
        text: &str,
    ) -> Result<(), RagError> {
        let vector = self.embedder.embed(text, EmbeddingRole::Document).await?;

        let passage = Passage::new(source_id, text).with_vector(vector.as_slice().to_vec());
        self.retriever
            .strategy()
            .local()
            .insert(assistant_id, passage)
            .await?;

        if let Some(remote) = self.retriever.strategy().remote() {
            let timeout = Duration::from_millis(self.retriever.config().await.remote_timeout_ms);
            match tokio::time::timeout(
                timeout,
                remote.upsert_vector(source_id, assistant_id, text, &vector),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Remote upsert of {} for assistant {} failed, kept locally: {}",
                    source_id, assistant_id, e
                ),
                Err(_) => warn!(
                    "Remote upsert of {} for assistant {} timed out after {:?}, kept locally",
                    source_id, assistant_id, timeout
                ),
            }
        }

        if self.settings.read().await.invalidate_cache_on_ingest {
            self.cache.clear_assistant_cache(assistant_id).await;
        }

        debug!("Indexed passage {} for assistant {}", source_id, assistant_id);
        Ok(())
    }
}
