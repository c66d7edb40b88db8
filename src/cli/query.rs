// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::RagConfig;
use crate::rag::RagQueryOrchestrator;

/// Arguments for the query command
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Assistant whose knowledge is searched
    #[arg(long)]
    pub assistant: String,

    /// JSON file with passages to index first: [{"source_id": "...", "text": "..."}]
    #[arg(long)]
    pub passages: Option<PathBuf>,

    /// Number of passages kept after reranking (overrides config)
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Ask the query this many times, to exercise the semantic cache
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// Print only the assembled context
    #[arg(long)]
    pub context_only: bool,

    /// Query text
    pub query: String,
}

#[derive(Debug, Deserialize)]
struct PassageInput {
    source_id: String,
    text: String,
}

fn read_passages(path: &Path) -> Result<Vec<PassageInput>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read passages from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Invalid passages file {}", path.display()))
}

/// Index the given passages, then answer the query
pub async fn run_query(args: QueryArgs, mut config: RagConfig) -> Result<()> {
    if args.repeat == 0 {
        return Err(anyhow!("--repeat must be at least 1"));
    }
    if let Some(top_k) = args.top_k {
        config.reranker.top_k = top_k;
    }

    let orchestrator = RagQueryOrchestrator::from_config(&config, None).await?;

    if let Some(path) = &args.passages {
        let passages = read_passages(path)?;
        println!("📚 Indexing {} passages for {}...", passages.len(), args.assistant);
        for passage in &passages {
            orchestrator
                .index_passage(&args.assistant, &passage.source_id, &passage.text)
                .await?;
        }
        info!("Indexed {} passages", passages.len());
    }

    for _ in 0..args.repeat {
        let response = orchestrator.query(&args.assistant, &args.query).await?;
        if args.context_only {
            println!("{}", response.context);
        } else {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    if args.repeat > 1 && !args.context_only {
        let stats = orchestrator.cache().stats().await;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    Ok(())
}
