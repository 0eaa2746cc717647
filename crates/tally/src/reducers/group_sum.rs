//! 🗂️ GroupSum — per-group totals of one numeric column, keyed by another.

use std::collections::BTreeMap;

use super::Reducer;
use crate::common::Batch;
use crate::error::AggregateError;

/// 🗂️ `value_column` totals per distinct `group_column` value.
///
/// A group whose values are all empty still shows up, with a total of 0.
/// The map is ordered so reports come out the same way every run.
#[derive(Debug, Clone)]
pub struct GroupSum {
    group_column: String,
    value_column: String,
}

impl GroupSum {
    pub fn new(group_column: impl Into<String>, value_column: impl Into<String>) -> Self {
        Self {
            group_column: group_column.into(),
            value_column: value_column.into(),
        }
    }
}

impl Reducer for GroupSum {
    type Acc = BTreeMap<String, f64>;

    fn reduce(&self, mut acc: Self::Acc, batch: &Batch) -> Result<Self::Acc, AggregateError> {
        let group_index = batch.column_index(&self.group_column)?;
        let value_index = batch.column_index(&self.value_column)?;

        for (offset, record) in batch.records().iter().enumerate() {
            let key = record.get(group_index).unwrap_or("");
            // -- only allocate a key the first time a group shows up
            if !acc.contains_key(key) {
                acc.insert(key.to_string(), 0.0);
            }
            let cell = record.get(value_index).unwrap_or("").trim();
            if cell.is_empty() {
                continue;
            }
            let value = cell.parse::<f64>().map_err(|_| {
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(batch.first_line() + offset as u64);
                AggregateError::malformed(
                    batch.source_id(),
                    line,
                    format!("'{cell}' in column '{}' is not a number", self.value_column),
                )
            })?;
            if let Some(total) = acc.get_mut(key) {
                *total += value;
            }
        }
        Ok(acc)
    }
}
