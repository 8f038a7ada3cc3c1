//! ttsprep CLI - warm feature caches ahead of training
//!
//! Loads every example in the corpus once so that on-disk pitch and
//! alignment-prior caches are fully populated before the training loop
//! starts pulling batches.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use ttsprep::{DatasetConfig, TtsDataset, VERSION};

/// Warm pitch and alignment-prior caches for a TTS training corpus
#[derive(Parser, Debug)]
#[command(name = "ttsprep")]
#[command(version, about)]
struct Cli {
    /// Dataset configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Worker threads (default: all cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Only process the first N entries
    #[arg(long)]
    limit: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    info!(version = VERSION, "ttsprep cache warming");

    if let Some(jobs) = cli.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("failed to configure worker pool")?;
    }

    let config = DatasetConfig::from_file(&cli.config)
        .with_context(|| format!("invalid configuration {}", cli.config.display()))?;
    let dataset = TtsDataset::new(config).context("failed to construct dataset")?;

    let total = cli.limit.unwrap_or(dataset.len()).min(dataset.len());
    info!(entries = total, "processing corpus");

    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )?
        .progress_chars("#>-"),
    );

    let failures = AtomicUsize::new(0);
    let start = Instant::now();

    (0..total).into_par_iter().for_each(|index| {
        if let Err(e) = dataset.load(index) {
            failures.fetch_add(1, Ordering::Relaxed);
            error!(index, audio = %dataset.entry(index).audio.display(), "load failed: {e}");
        }
        bar.inc(1);
    });
    bar.finish();

    let failed = failures.load(Ordering::Relaxed);
    info!(
        processed = total - failed,
        failed,
        elapsed_secs = start.elapsed().as_secs(),
        "cache warming complete"
    );

    if failed > 0 {
        anyhow::bail!("{failed} of {total} examples failed to load");
    }
    Ok(())
}
