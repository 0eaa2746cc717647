//! 🧮 tally — streaming CSV aggregation in bounded memory.
//!
//! Give it an ordered list of CSV files (any number, any size) and a reducer. It reads
//! them one chunk at a time, folds each chunk into an accumulator, and forgets the chunk.
//! Peak memory is one chunk plus the accumulator, whether the input is ten rows or ten
//! billion.
//!
//! ```text
//!   AppConfig ─▶ SourceSequencer ─(Batch)─▶ Aggregator ─(RunOutcome)─▶ RunReport ─▶ Reporter
//!                  └─ CsvSource / SyntheticSource, one open at a time
//! ```
//!
//! 🦆

use anyhow::Context;
use tracing::info;

pub mod aggregator;
pub mod app_config;
pub mod backends;
pub mod cache;
pub mod common;
pub mod error;
pub(crate) mod progress;
pub mod reducers;
pub mod reporters;
pub mod sequencer;

use crate::aggregator::Aggregator;
use crate::app_config::AppConfig;
use crate::cache::{RunCache, RunKey};
use crate::reducers::ReducerBackend;
use crate::reporters::RunReport;
use crate::sequencer::SourceSequencer;

/// 🚀 One full run, as configured: sequence the sources, fold them, build the report.
///
/// A failed run comes back as an `anyhow::Error` whose chain still holds the
/// [`error::RunFailed`], so callers can `downcast_ref` for the source and progress.
pub async fn run(config: &AppConfig) -> anyhow::Result<RunReport> {
    info!(
        "🚀 tally starting: {} over {} sources (chunk_size {})",
        config.reducer,
        config.sources.len(),
        config.reader.chunk_size
    );

    let sequencer = SourceSequencer::new(config.sources.clone(), config.reader.clone())
        .context("💀 Could not set up the source sequence")?;
    let reducer = ReducerBackend::from_config(&config.reducer);
    let identity = reducer.identity();

    let outcome = Aggregator::new(sequencer)
        .run(&reducer, identity)
        .await
        .context(format!("💀 Aggregating with {} failed", config.reducer))?;

    Ok(RunReport::new(config.sources.clone(), config.reducer.clone(), outcome))
}

/// 🗄️ [`run`], but answered from `cache` when the same sources and reducer already ran.
pub async fn run_cached(cache: &mut RunCache, config: &AppConfig) -> anyhow::Result<RunReport> {
    let key = RunKey::new(config.sources.clone(), config.reducer.clone());
    if let Some(report) = cache.get(&key) {
        info!("🗄️ cache hit for {}, no files were harmed", config.reducer);
        return Ok(report.clone());
    }

    let report = run(config).await?;
    cache.insert(key, report.clone());
    Ok(report)
}
