//! 📣 Reporters — the last stop. A completed run walks in, a table or a JSON blob walks out.
//!
//! Failed runs never get here: there is nothing honest to report about half a total.
//!
//! Same layout as the backends: a `Reporter` trait, one struct per output, and a
//! `ReporterBackend` enum that config resolves to. 🦆

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize, Serializer};
use tracing::info;

use crate::aggregator::RunOutcome;
use crate::common::SourceId;
use crate::progress::format_count;
use crate::reducers::{Accumulator, ReducerConfig};

/// 🖨️ How the final report is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// ⚙️ The `[output]` table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// 📁 JSON goes here instead of stdout when set.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn as_secs<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// 📋 Everything worth saying about a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceId>,
    pub reducer: ReducerConfig,
    pub accumulator: Accumulator,
    /// ⏱️ serialized as fractional seconds
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub records: u64,
    pub batches: u64,
    pub skipped_malformed: u64,
}

impl RunReport {
    pub fn new(sources: Vec<SourceId>, reducer: ReducerConfig, outcome: RunOutcome<Accumulator>) -> Self {
        Self {
            sources,
            reducer,
            accumulator: outcome.accumulator,
            elapsed: outcome.elapsed,
            records: outcome.records,
            batches: outcome.batches,
            skipped_malformed: outcome.skipped_malformed,
        }
    }
}

/// 📣 Something that can present a finished run.
#[async_trait]
pub trait Reporter: std::fmt::Debug + Send {
    async fn report(&mut self, report: &RunReport) -> anyhow::Result<()>;
}

/// 🖥️ A human-shaped table on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    /// 🎨 Build the table without printing it.
    pub fn render(&self, report: &RunReport) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        let sources = report
            .sources
            .iter()
            .map(SourceId::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![Cell::new("sources"), Cell::new(sources)]);
        table.add_row(vec![Cell::new("reducer"), Cell::new(report.reducer.to_string())]);

        match &report.accumulator {
            Accumulator::Count(n) => {
                table.add_row(vec![
                    Cell::new("Total number of rows"),
                    Cell::new(format_count(*n)).set_alignment(CellAlignment::Right),
                ]);
            }
            Accumulator::Sum(total) => {
                table.add_row(vec![
                    Cell::new("total"),
                    Cell::new(format!("{total:.4}")).set_alignment(CellAlignment::Right),
                ]);
            }
            Accumulator::Groups(groups) => {
                for (group, total) in groups {
                    table.add_row(vec![
                        Cell::new(group),
                        Cell::new(format!("{total:.4}")).set_alignment(CellAlignment::Right),
                    ]);
                }
            }
        }

        table.add_row(vec![
            Cell::new("records"),
            Cell::new(format_count(report.records)).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new("batches"),
            Cell::new(format_count(report.batches)).set_alignment(CellAlignment::Right),
        ]);
        if report.skipped_malformed > 0 {
            table.add_row(vec![
                Cell::new("skipped (malformed)"),
                Cell::new(format_count(report.skipped_malformed)).set_alignment(CellAlignment::Right),
            ]);
        }
        table.add_row(vec![
            Cell::new("total time"),
            Cell::new(format!("{:.3}s", report.elapsed.as_secs_f64())).set_alignment(CellAlignment::Right),
        ]);

        table.to_string()
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn report(&mut self, report: &RunReport) -> anyhow::Result<()> {
        println!("{}", self.render(report));
        Ok(())
    }
}

/// 🧾 Pretty JSON, to stdout or to `file`.
#[derive(Debug, Default, Clone)]
pub struct JsonReporter {
    file: Option<PathBuf>,
}

impl JsonReporter {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self { file }
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn report(&mut self, report: &RunReport) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(report).context("💀 run report refused to become JSON")?;
        match &self.file {
            Some(path) => {
                tokio::fs::write(path, format!("{json}\n"))
                    .await
                    .with_context(|| format!("💀 could not write the report to '{}'", path.display()))?;
                info!("🧾 report written to {}", path.display());
            }
            None => println!("{json}"),
        }
        Ok(())
    }
}

/// 🎭 Config-resolved reporter.
#[derive(Debug)]
pub enum ReporterBackend {
    Console(ConsoleReporter),
    Json(JsonReporter),
}

impl ReporterBackend {
    pub fn from_output_config(config: &OutputConfig) -> Self {
        match config.format {
            // -- a table in a file is nobody's idea of a machine-readable report, so `file` implies JSON
            OutputFormat::Table if config.file.is_none() => ReporterBackend::Console(ConsoleReporter),
            _ => ReporterBackend::Json(JsonReporter::new(config.file.clone())),
        }
    }
}

#[async_trait]
impl Reporter for ReporterBackend {
    async fn report(&mut self, report: &RunReport) -> anyhow::Result<()> {
        match self {
            ReporterBackend::Console(r) => r.report(report).await,
            ReporterBackend::Json(r) => r.report(report).await,
        }
    }
}
