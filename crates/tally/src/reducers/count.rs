//! 🔢 Count — adds the batch length. Row counting, in its final form.

use super::Reducer;
use crate::common::Batch;
use crate::error::AggregateError;

/// 🔢 Rows seen so far. Needs no columns, fears no header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl Reducer for Count {
    type Acc = u64;

    fn reduce(&self, acc: u64, batch: &Batch) -> Result<u64, AggregateError> {
        Ok(acc + batch.len() as u64)
    }
}
