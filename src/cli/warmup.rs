// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use clap::Args;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::RagConfig;
use crate::embeddings::EmbeddingEngine;
use crate::models::{LoadProgress, LoadStage, ProgressCallback};
use crate::rerank::Reranker;

/// Arguments for the warmup command
#[derive(Args, Debug)]
pub struct WarmupArgs {
    /// Only load the embedding model
    #[arg(long)]
    pub skip_reranker: bool,
}

/// One progress bar per model, created on its first milestone
struct LoadBars {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl LoadBars {
    fn new() -> Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} {prefix:40} [{bar:30.cyan/blue}] {pos}% | {msg}")?
            .progress_chars("=>-");
        Ok(Self {
            multi: MultiProgress::new(),
            style,
            bars: Mutex::new(HashMap::new()),
        })
    }

    fn update(&self, progress: &LoadProgress) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = bars.entry(progress.model_name.clone()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(self.style.clone());
            bar.set_prefix(progress.model_name.clone());
            bar
        });

        bar.set_position((progress.fraction * 100.0).round() as u64);
        bar.set_message(progress.stage.to_string());
        match progress.stage {
            LoadStage::Ready => bar.finish_with_message("ready"),
            LoadStage::Failed => bar.abandon_with_message("failed"),
            _ => {}
        }
    }
}

/// Load both models so the first query does not pay for it
pub async fn run_warmup(args: WarmupArgs, config: RagConfig) -> Result<()> {
    let bars = Arc::new(LoadBars::new()?);
    let callback: ProgressCallback = {
        let bars = bars.clone();
        Arc::new(move |progress: &LoadProgress| bars.update(progress))
    };

    let start = Instant::now();
    let embedder = EmbeddingEngine::onnx(config.embedding.clone(), Some(callback.clone()));
    embedder.ensure_loaded().await?;
    println!(
        "✅ Embedding model {} ready ({} dims)",
        embedder.model_name(),
        embedder.dimension()
    );

    if args.skip_reranker || !config.reranker.enabled {
        println!("⏭️  Reranker skipped");
    } else {
        let reranker = Reranker::onnx(&config.reranker, Some(callback));
        reranker.ensure_loaded().await?;
        let path = reranker
            .execution_path()
            .await
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("✅ Reranker {} ready on {}", reranker.model_name(), path);
    }

    println!("Warmup finished in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}
