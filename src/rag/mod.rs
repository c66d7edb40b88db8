// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Retrieval-augmented query pipeline

pub mod context;
pub mod errors;
pub mod orchestrator;
pub mod types;

pub use context::{AssembledContext, ContextBuilder, ContextConfig};
pub use errors::{ModelError, RagError};
pub use orchestrator::{QueryStage, RagQueryOrchestrator, RagResponse, StageTimings};
pub use types::{Passage, RetrievalResult, RetrievalSource, ScoreStage};
