// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Lazily initialized, shared model instance
//!
//! The first caller of [`LazyModel::get_or_load`] spawns the load on the
//! runtime and stores a shared handle to it. Every later caller, including
//! callers that arrive while the load is still running, awaits that same
//! handle. The load runs as its own task, so a caller that gives up waiting
//! never cancels it for the others.
//!
//! A failed load is cached: the instance keeps returning the same error.
//! Construct a new `LazyModel` (or a new engine owning one) to retry.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::rag::errors::ModelError;

type LoadResult<M> = Result<Arc<M>, ModelError>;
type SharedLoad<M> = Shared<BoxFuture<'static, LoadResult<M>>>;

pub struct LazyModel<M: ?Sized + Send + Sync + 'static> {
    name: String,
    slot: Mutex<Option<SharedLoad<M>>>,
}

impl<M: ?Sized + Send + Sync + 'static> LazyModel<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the loaded model, starting the load with `load` if nobody has yet
    ///
    /// `load` is only invoked by the first caller.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> LoadResult<M>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LoadResult<M>> + Send + 'static,
    {
        let shared = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    debug!("Starting load for model {}", self.name);
                    let handle = tokio::spawn(load());
                    let model_name = self.name.clone();
                    let shared = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(join_error) => {
                                error!("Loader task for {} aborted: {}", model_name, join_error);
                                Err(ModelError::LoaderAborted {
                                    model: model_name,
                                    reason: join_error.to_string(),
                                })
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    /// The model, if loading has already completed successfully
    pub async fn loaded(&self) -> Option<Arc<M>> {
        let slot = self.slot.lock().await;
        match slot.as_ref().and_then(|shared| shared.peek()) {
            Some(Ok(model)) => Some(model.clone()),
            _ => None,
        }
    }

    /// Whether a load has been started (whatever its outcome)
    pub async fn is_started(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// The cached load error, if loading has failed
    pub async fn failure(&self) -> Option<ModelError> {
        let slot = self.slot.lock().await;
        match slot.as_ref().and_then(|shared| shared.peek()) {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }
}
