//! 💀 Errors — the taxonomy of everything that can go wrong while counting rows.
//!
//! 🎬 *[a CSV file is opened. it has 10 million rows. row 4,817,203 has one comma too many.]*
//! *[nobody knows why. the person who generated it has since moved to a farm.]*
//!
//! The library speaks typed errors so callers can `match` on what happened instead of
//! sniffing strings like a truffle pig. The binary crate wraps these in `anyhow` at the
//! edges, the same way the config loader does. 🦆
//!
//! 🧠 Knowledge graph:
//! - `AggregateError`: one failure, tagged with the offending source when there is one.
//! - `RunFailed`: the terminal error of a run plus how many records made it through
//!   before the lights went out. Diagnostic only. Not a partial result. Never a partial result.

use std::io;

use thiserror::Error;

use crate::common::SourceId;

/// 🧨 Everything that can abort a run, in one enum.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// 🚪 The source could not be opened. Missing file, bad permissions, cosmic rays.
    #[error("💀 source '{source_id}' could not be opened")]
    SourceNotFound {
        source_id: SourceId,
        #[source]
        cause: io::Error,
    },

    /// 🧾 A line that does not fit the header's shape (or is not text, or never closes its quote).
    #[error("💀 malformed record in '{source_id}' at line {line}: {reason}")]
    MalformedRecord {
        source_id: SourceId,
        line: u64,
        reason: String,
    },

    /// 🔍 A reducer asked for a column the header never mentioned.
    #[error("💀 column '{column}' not found in the header of '{source_id}'")]
    ColumnNotFound { source_id: SourceId, column: String },

    /// ⚙️ Caught before any I/O happened: empty source list, zero chunk size, a re-run.
    #[error("💀 invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// 📡 The file opened fine, then a read failed halfway through.
    #[error("💀 failed reading from '{source_id}'")]
    Io {
        source_id: SourceId,
        #[source]
        cause: io::Error,
    },
}

impl AggregateError {
    /// 🏷️ The source this error is about, if it is about one.
    pub fn source_id(&self) -> Option<&SourceId> {
        match self {
            AggregateError::SourceNotFound { source_id, .. }
            | AggregateError::MalformedRecord { source_id, .. }
            | AggregateError::ColumnNotFound { source_id, .. }
            | AggregateError::Io { source_id, .. } => Some(source_id),
            AggregateError::InvalidConfiguration(_) => None,
        }
    }

    pub(crate) fn malformed(source_id: &SourceId, line: u64, reason: impl Into<String>) -> Self {
        AggregateError::MalformedRecord {
            source_id: source_id.clone(),
            line,
            reason: reason.into(),
        }
    }
}

/// ⚰️ A run that died. Carries the cause and the body count.
///
/// `records_aggregated` tells you how far the run got before it failed. It is there for the
/// post-mortem, not for the dashboard. Reporting it as a total is how you end up in a meeting.
#[derive(Debug, Error)]
#[error("💀 run failed after aggregating {records_aggregated} records")]
pub struct RunFailed {
    #[source]
    pub error: AggregateError,
    pub records_aggregated: u64,
}

impl RunFailed {
    /// 🏷️ Shortcut to the offending source, when the error names one.
    pub fn source_id(&self) -> Option<&SourceId> {
        self.error.source_id()
    }
}
