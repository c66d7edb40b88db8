// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model runtime shared by the embedding engine and the reranker
//!
//! - `lazy`: load-once shared model handle
//! - `progress`: typed loading milestones
//! - `onnx`: ONNX Runtime session construction per execution path
//! - `hub`: model file resolution (local directory or Hugging Face Hub)

pub mod hub;
pub mod lazy;
pub mod onnx;
pub mod progress;

pub use hub::{ModelFiles, ModelSource};
pub use lazy::LazyModel;
pub use onnx::{build_session, build_session_with_fallback, ExecutionPath};
pub use progress::{LoadProgress, LoadStage, ProgressCallback, ProgressReporter};
