// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Remote vector-indexed backend
//!
//! The backend stores assistant-scoped passages with their vectors and
//! answers top-K searches with server-side scores (`1 - cosine_distance`).
//! Vectors cross the wire as comma-separated float lists.

use async_trait::async_trait;
use reqwest::{Client, Error as ReqwestError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::mock::InMemoryVectorBackend;
use super::similarity::QueryVector;

/// One row returned by a remote search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMatch {
    pub text: String,
    #[serde(alias = "sourceId")]
    pub source_id: String,
    /// `1 - cosine_distance`, computed by the backend
    pub similarity: f32,
}

#[derive(Error, Debug)]
pub enum RemoteBackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ReqwestError),
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Malformed backend response: {0}")]
    Decode(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Client side of the remote vector backend
#[async_trait]
pub trait RemoteVectorBackend: Send + Sync {
    /// Top-K passages for `assistant_id`, best first
    async fn search(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        top_k: usize,
    ) -> Result<Vec<RemoteMatch>, RemoteBackendError>;

    /// Inserts or replaces the passage stored under `source_id`
    async fn upsert_vector(
        &self,
        source_id: &str,
        assistant_id: &str,
        text: &str,
        vector: &QueryVector,
    ) -> Result<(), RemoteBackendError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VectorBackend {
    /// In-process backend, for offline use and tests
    Mock,
    Real { api_url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteBackendConfig {
    pub backend: VectorBackend,
    pub api_key: Option<String>,
    /// HTTP client timeout; searches are additionally bounded by the retriever
    pub timeout_ms: u64,
}

impl Default for RemoteBackendConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Mock,
            api_key: None,
            timeout_ms: 5000,
        }
    }
}

/// Builds the backend selected by `config`
pub fn build_remote_backend(
    config: &RemoteBackendConfig,
) -> Result<Arc<dyn RemoteVectorBackend>, RemoteBackendError> {
    match &config.backend {
        VectorBackend::Mock => Ok(Arc::new(InMemoryVectorBackend::new())),
        VectorBackend::Real { api_url } => Ok(Arc::new(HttpVectorBackend::new(
            api_url,
            config.api_key.clone(),
            config.timeout_ms,
        )?)),
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    assistant_id: &'a str,
    vector: String,
    k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<RemoteMatch>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    source_id: &'a str,
    assistant_id: &'a str,
    text: &'a str,
    vector: String,
}

/// HTTP client for the remote backend
///
/// - `POST {api_url}/search` with `{assistant_id, vector, k}`,
///   answered by `{results: [{text, source_id, similarity}]}`
/// - `POST {api_url}/vectors` with `{source_id, assistant_id, text, vector}`
pub struct HttpVectorBackend {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl HttpVectorBackend {
    pub fn new(
        api_url: &str,
        api_key: Option<String>,
        timeout_ms: u64,
    ) -> Result<Self, RemoteBackendError> {
        reqwest::Url::parse(api_url)
            .map_err(|e| RemoteBackendError::InvalidConfig(format!("Invalid URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_ms,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.api_url, path);
        let mut request = self.client.post(&url);

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        request
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, RemoteBackendError> {
        let response = self
            .post(path)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteBackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    fn classify(&self, error: ReqwestError) -> RemoteBackendError {
        if error.is_timeout() {
            RemoteBackendError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            RemoteBackendError::Http(error)
        }
    }
}

#[async_trait]
impl RemoteVectorBackend for HttpVectorBackend {
    async fn search(
        &self,
        assistant_id: &str,
        query: &QueryVector,
        top_k: usize,
    ) -> Result<Vec<RemoteMatch>, RemoteBackendError> {
        let request = SearchRequest {
            assistant_id,
            vector: query.to_wire(),
            k: top_k,
        };

        let response = self.send("search", &request).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RemoteBackendError::Decode(e.to_string()))?;

        debug!(
            "Remote search for assistant {} returned {} rows",
            assistant_id,
            parsed.results.len()
        );
        Ok(parsed.results)
    }

    async fn upsert_vector(
        &self,
        source_id: &str,
        assistant_id: &str,
        text: &str,
        vector: &QueryVector,
    ) -> Result<(), RemoteBackendError> {
        let request = UpsertRequest {
            source_id,
            assistant_id,
            text,
            vector: vector.to_wire(),
        };

        self.send("vectors", &request).await?;
        Ok(())
    }
}
