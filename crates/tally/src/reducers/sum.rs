//! ➕ Sum — adds up one numeric column.

use super::Reducer;
use crate::common::Batch;
use crate::error::AggregateError;

/// ➕ Total of `column` across every record.
///
/// Values are added to the accumulator one at a time, in record order, so the
/// floating-point result does not depend on where batch boundaries fall.
#[derive(Debug, Clone)]
pub struct Sum {
    column: String,
}

impl Sum {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Reducer for Sum {
    type Acc = f64;

    fn reduce(&self, acc: f64, batch: &Batch) -> Result<f64, AggregateError> {
        let index = batch.column_index(&self.column)?;
        batch
            .numeric_values(index)
            .try_fold(acc, |total, value| value.map(|(_, v)| total + v))
    }
}
