// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Context assembly
//!
//! Turns ranked passages into the context string handed to the language
//! model. Each passage is labelled with its source id; passages are joined
//! by a delimiter. No passages means an empty string.

use serde::{Deserialize, Serialize};

use super::types::{Passage, ScoreStage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub delimiter: String,
    /// Stop adding passages once the context would exceed this many characters
    pub max_context_chars: Option<usize>,
    /// Append each passage's ranking score to its label
    pub include_scores: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            delimiter: "\n\n---\n\n".to_string(),
            max_context_chars: None,
            include_scores: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    /// Source ids of the included passages, in order
    pub source_ids: Vec<String>,
    /// Whether passages were left out to respect `max_context_chars`
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Builds the context from passages in ranking order
    ///
    /// With `max_context_chars` set, passages are added whole until the next
    /// one would not fit; a passage is never cut in the middle.
    pub fn build(&self, passages: &[Passage]) -> AssembledContext {
        let mut text = String::new();
        let mut source_ids = Vec::new();
        let mut truncated = false;

        for passage in passages {
            let block = self.format_passage(passage);
            let separator = if text.is_empty() { "" } else { self.config.delimiter.as_str() };

            if let Some(limit) = self.config.max_context_chars {
                let projected = text.chars().count() + separator.chars().count() + block.chars().count();
                if projected > limit {
                    truncated = true;
                    break;
                }
            }

            text.push_str(separator);
            text.push_str(&block);
            source_ids.push(passage.source_id.clone());
        }

        AssembledContext {
            text,
            source_ids,
            truncated,
        }
    }

    fn format_passage(&self, passage: &Passage) -> String {
        let label = match (self.config.include_scores, passage.ranking_score()) {
            (true, Some((ScoreStage::CrossEncoder, score))) => {
                format!("[Source: {}] (relevance: {:.3})", passage.source_id, score)
            }
            (true, Some((ScoreStage::VectorSimilarity, score))) => {
                format!("[Source: {}] (similarity: {:.3})", passage.source_id, score)
            }
            _ => format!("[Source: {}]", passage.source_id),
        };

        format!("{}\n{}", label, passage.text.trim())
    }
}
