//! 📦 Common data structures — the building blocks of tally
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. ACTUARIAL DEPARTMENT — 3:47 AM
//!
//! 🌩️ Five CSV files. Ten million rows each. Someone asked "how many rows total?"
//! and then went home. The question remains. The files remain. The RAM does not
//! remain, not if you try to load all fifty million rows at once.
//!
//! ✅ And then — a `Batch` arrives. A bounded, polite little bundle of records from
//! exactly one source. It knows where it came from, which line it started on, and
//! how many bytes it cost. It does not know what the aggregator will do to it.
//! Relatable. 🦆
//!
//! This module defines the humble, load-bearing types that carry records from the
//! reader to the reducer: [`SourceId`] and [`Batch`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use csv::StringRecord;
use serde::{Deserialize, Serialize};

use crate::error::AggregateError;

/// 🏷️ The name of one input — a path, usually. Cheap to clone, impossible to mutate.
///
/// `Arc<str>` because every batch carries one and we refuse to allocate a fresh
/// `String` per batch just to say "it came from the same file as the last one".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SourceId(Arc<str>);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        SourceId(Arc::from(value))
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        SourceId(Arc::from(value))
    }
}

impl From<SourceId> for String {
    fn from(value: SourceId) -> Self {
        value.0.to_string()
    }
}

/// 📦 A `Batch` — at most `chunk_size` records, all from one source, in file order.
///
/// Think of it as a shopping cart with a weight limit. The reader fills it, the
/// aggregator empties it, and then it gets dropped on the floor before the next
/// cart rolls in. Nobody keeps the carts. Keeping the carts is how memory grows.
///
/// The header rides along behind an `Arc` so reducers can look up columns
/// without the reader cloning the header for every batch.
#[derive(Debug, Clone)]
pub struct Batch {
    source_id: SourceId,
    header: Arc<StringRecord>,
    records: Vec<StringRecord>,
    /// 📍 1-based physical line number of the first record (the header is line 1)
    first_line: u64,
    /// 📏 raw bytes consumed from the source to build this batch
    bytes: usize,
}

impl Batch {
    pub fn new(
        source_id: SourceId,
        header: Arc<StringRecord>,
        records: Vec<StringRecord>,
        first_line: u64,
        bytes: usize,
    ) -> Self {
        Self {
            source_id,
            header,
            records,
            first_line,
            bytes,
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn header(&self) -> &StringRecord {
        &self.header
    }

    pub fn records(&self) -> &[StringRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_line(&self) -> u64 {
        self.first_line
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// 🔍 Position of `column` in the header, or `ColumnNotFound` tagged with this batch's source.
    pub fn column_index(&self, column: &str) -> Result<usize, AggregateError> {
        self.header
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| AggregateError::ColumnNotFound {
                source_id: self.source_id.clone(),
                column: column.to_string(),
            })
    }

    /// 🔢 Parse the numeric cells of one column, paired with the line they came from.
    ///
    /// Empty cells are missing values and are skipped. Anything else that refuses to be
    /// an `f64` is a `MalformedRecord`. The line number is a best-effort physical line:
    /// exact unless an earlier record in the batch spans several lines.
    pub fn numeric_values<'a>(
        &'a self,
        column: usize,
    ) -> impl Iterator<Item = Result<(u64, f64), AggregateError>> + 'a {
        self.records
            .iter()
            .enumerate()
            .filter_map(move |(offset, record)| {
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(self.first_line + offset as u64);
                let cell = record.get(column).unwrap_or("").trim();
                if cell.is_empty() {
                    return None;
                }
                Some(cell.parse::<f64>().map(|value| (line, value)).map_err(|_| {
                    AggregateError::malformed(
                        &self.source_id,
                        line,
                        format!("'{cell}' in column {column} is not a number"),
                    )
                }))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn the_batch() -> Batch {
        let header = Arc::new(StringRecord::from(vec!["insured_type", "gwp"]));
        let records = vec![
            StringRecord::from(vec!["Health", "10.5"]),
            StringRecord::from(vec!["Auto", ""]),
            StringRecord::from(vec!["Life", " 4.5 "]),
        ];
        Batch::new(SourceId::from("a.csv"), header, records, 2, 42)
    }

    #[test]
    fn the_one_where_columns_are_found_and_not_found() {
        let batch = the_batch();
        assert_eq!(batch.column_index("gwp").ok(), Some(1));
        match batch.column_index("profit") {
            Err(AggregateError::ColumnNotFound { source_id, column }) => {
                assert_eq!(source_id.as_str(), "a.csv");
                assert_eq!(column, "profit");
            }
            other => panic!("💀 expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_empty_cells_are_skipped_and_whitespace_is_forgiven() {
        let batch = the_batch();
        let values: Vec<f64> = batch
            .numeric_values(1)
            .map(|v| v.map(|(_, value)| value))
            .collect::<Result<_, _>>()
            .expect("💀 every non-empty cell is numeric");
        assert_eq!(values, vec![10.5, 4.5]);
    }

    #[test]
    fn the_one_where_a_word_pretends_to_be_a_number() {
        let batch = the_batch();
        let the_verdict: Result<Vec<_>, _> = batch.numeric_values(0).collect();
        assert!(matches!(
            the_verdict,
            Err(AggregateError::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn the_one_where_source_ids_round_trip_through_strings() {
        let id = SourceId::from(String::from("data/insurance_data_2024.csv"));
        assert_eq!(id.to_string(), "data/insurance_data_2024.csv");
        assert_eq!(id.as_path(), Path::new("data/insurance_data_2024.csv"));
        let back: String = id.into();
        assert_eq!(back, "data/insurance_data_2024.csv");
    }
}
