//! 🚀 tally — the front door. Parses flags, loads config, sets up logging, runs, reports.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! Everything interesting lives in the `tally` library. This binary is the manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tally::app_config::{ConfigOverrides, OutputFormat, OutputOverrides, ReaderOverrides};
use tally::backends::MalformedPolicy;
use tally::common::SourceId;
use tally::error::RunFailed;
use tally::reducers::ReducerConfig;
use tally::reporters::{Reporter, ReporterBackend};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🔧 Used when `--config` isn't given, but only if it actually exists.
const DEFAULT_CONFIG_FILE: &str = "tally.toml";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReducerKind {
    Count,
    Sum,
    GroupSum,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Table,
    Json,
}

/// 🧮 Aggregate any number of CSV files, in order, one chunk at a time.
#[derive(Debug, Parser)]
#[command(name = "tally", version, about)]
struct Cli {
    /// TOML config file (defaults to ./tally.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// CSV paths or synthetic:<year>:<rows> generators, read in this order
    sources: Vec<String>,

    /// Records per batch
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Field delimiter
    #[arg(long)]
    delimiter: Option<char>,

    #[arg(long, value_enum)]
    reducer: Option<ReducerKind>,

    /// Column to sum (for --reducer sum)
    #[arg(long)]
    column: Option<String>,

    /// Column to group by (for --reducer group-sum)
    #[arg(long)]
    group_column: Option<String>,

    /// Column to total per group (for --reducer group-sum)
    #[arg(long)]
    value_column: Option<String>,

    /// Skip and count malformed records instead of failing the run
    #[arg(long)]
    lenient: bool,

    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Show a progress bar per file
    #[arg(long)]
    progress: bool,
}

impl Cli {
    fn reducer_override(&self) -> Result<Option<ReducerConfig>> {
        let Some(kind) = self.reducer else {
            return Ok(None);
        };
        let reducer = match kind {
            ReducerKind::Count => ReducerConfig::Count,
            ReducerKind::Sum => ReducerConfig::Sum {
                column: self.column.clone().context("💀 --reducer sum needs --column")?,
            },
            ReducerKind::GroupSum => ReducerConfig::GroupSum {
                group_column: self
                    .group_column
                    .clone()
                    .context("💀 --reducer group-sum needs --group-column")?,
                value_column: self
                    .value_column
                    .clone()
                    .context("💀 --reducer group-sum needs --value-column")?,
            },
        };
        Ok(Some(reducer))
    }

    fn overrides(&self) -> Result<ConfigOverrides> {
        Ok(ConfigOverrides {
            sources: self.sources.iter().cloned().map(SourceId::from).collect(),
            reader: ReaderOverrides {
                chunk_size: self.chunk_size,
                delimiter: self.delimiter,
                malformed: self.lenient.then_some(MalformedPolicy::Skip),
                progress: self.progress.then_some(true),
            },
            reducer: self.reducer_override()?,
            output: OutputOverrides {
                format: self.format.map(|format| match format {
                    FormatArg::Table => OutputFormat::Table,
                    FormatArg::Json => OutputFormat::Json,
                }),
                file: self.output.clone(),
            },
        })
    }

    /// 🔒 An explicit `--config` must exist; the default one is optional.
    fn config_file(&self) -> Result<Option<PathBuf>> {
        match &self.config {
            Some(path) => {
                let exists = path.try_exists().with_context(|| {
                    format!("💀 Couldn't check whether '{}' exists", path.display())
                })?;
                if !exists {
                    anyhow::bail!(
                        "💀 Configuration file '{}' not found. Relative paths resolve against the current directory.",
                        path.display()
                    );
                }
                Ok(Some(path.clone()))
            }
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                Ok(default.is_file().then_some(default))
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config_file()?;
    let app_config = tally::app_config::load_config(config_file.as_deref(), cli.overrides()?)
        .context("💀 Couldn't load the configuration. Check the file, the TALLY_* variables, and the flags")?;

    let report = tally::run(&app_config).await?;

    let mut reporter = ReporterBackend::from_output_config(&app_config.output);
    reporter.report(&report).await.context("💀 The run finished but the report didn't")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion, one layer at a time
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
        }
        if let Some(failed) = err.downcast_ref::<RunFailed>() {
            let culprit = failed
                .source_id()
                .map_or_else(|| "<no particular source>".to_string(), ToString::to_string);
            error!(
                "🔎 run failed at {} after {} records; no partial result was reported",
                culprit, failed.records_aggregated
            );
        }
        std::process::exit(1);
    }
}
