// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod query;
pub mod warmup;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RagConfig;

/// Fabstir RAG CLI
#[derive(Parser, Debug)]
#[command(name = "fabstir-rag")]
#[command(version)]
#[command(about = "Retrieval pipeline tools: indexing, querying and model warmup", long_about = None)]
pub struct Cli {
    /// TOML configuration file (RAG_* env vars override it)
    #[arg(long, global = true, env = "RAG_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index passages for an assistant and answer a query
    Query(query::QueryArgs),

    /// Load the embedding and reranking models ahead of time
    Warmup(warmup::WarmupArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = RagConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Query(args) => query::run_query(args, config).await,
        Commands::Warmup(args) => warmup::run_warmup(args, config).await,
    }
}
