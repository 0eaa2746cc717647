//! 🔄 Reducers — the fold functions that turn batches into one number (or one map of numbers).
//!
//! 🎬 COLD OPEN — INT. FINANCE FLOOR — QUARTER END — 11:58 PM
//!
//! "How many rows?" asked the VP. "What's the total GWP?" asked the CFO.
//! "What's the GWP per insured type?" asked someone who had clearly never
//! waited for a 50 million row spreadsheet to open. Three questions. Three
//! reducers. One pass over the data each. Nobody opens a spreadsheet tonight.
//!
//! ## Architecture 📐
//!
//! ```text
//!   identity ──▶ reduce(acc, batch₁) ──▶ reduce(acc, batch₂) ──▶ … ──▶ final acc
//! ```
//!
//! A reducer is a pure function of (accumulator, batch). Same inputs, same output,
//! every time. That's what makes chunk size irrelevant to the answer and the tests
//! deterministic.
//!
//! ## Knowledge Graph 🧠
//! - `Reducer` trait: the fold step, generic over its accumulator type
//! - `Count`, `Sum`, `GroupSum`: the standard trio, each in its own submodule
//! - `from_fn`: bring your own closure
//! - `ReducerConfig` → `ReducerBackend` → `Accumulator`: the config-driven path, same
//!   trait → concrete impls → enum dispatcher pattern as the backends
//!
//! 🦆

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::common::Batch;
use crate::error::AggregateError;

pub(crate) mod count;
pub(crate) mod group_sum;
pub(crate) mod sum;

pub use count::Count;
pub use group_sum::GroupSum;
pub use sum::Sum;

/// 🔄 One fold step: `(accumulator, batch) -> accumulator`.
///
/// # Contract 📜
/// - Pure with respect to the batch: identical inputs, identical output.
/// - Takes the accumulator by value so big maps move instead of clone.
/// - Borrows the batch; the aggregator drops it right after this returns.
/// - An `Err` ends the run and the accumulator goes with it. No partial totals.
pub trait Reducer {
    type Acc;

    fn reduce(&self, acc: Self::Acc, batch: &Batch) -> Result<Self::Acc, AggregateError>;
}

/// 🧰 A reducer made from a closure. For everything the standard trio doesn't cover.
pub struct FnReducer<F, A> {
    f: F,
    _acc: PhantomData<fn(A) -> A>,
}

impl<F, A> fmt::Debug for FnReducer<F, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnReducer").finish_non_exhaustive()
    }
}

/// 🧰 Wrap a closure as a [`Reducer`].
///
/// ```ignore
/// let longest = reducers::from_fn(|acc: usize, batch: &Batch| Ok(acc.max(batch.len())));
/// ```
pub fn from_fn<F, A>(f: F) -> FnReducer<F, A>
where
    F: Fn(A, &Batch) -> Result<A, AggregateError>,
{
    FnReducer {
        f,
        _acc: PhantomData,
    }
}

impl<F, A> Reducer for FnReducer<F, A>
where
    F: Fn(A, &Batch) -> Result<A, AggregateError>,
{
    type Acc = A;

    fn reduce(&self, acc: A, batch: &Batch) -> Result<A, AggregateError> {
        (self.f)(acc, batch)
    }
}

/// ⚙️ Which standard reducer to run, as it appears in config.
///
/// ```toml
/// [reducer]
/// kind = "group_sum"
/// group_column = "insured_type"
/// value_column = "gwp"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReducerConfig {
    #[default]
    Count,
    Sum {
        column: String,
    },
    GroupSum {
        group_column: String,
        value_column: String,
    },
}

impl fmt::Display for ReducerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReducerConfig::Count => write!(f, "count"),
            ReducerConfig::Sum { column } => write!(f, "sum({column})"),
            ReducerConfig::GroupSum {
                group_column,
                value_column,
            } => write!(f, "group_sum({group_column}, {value_column})"),
        }
    }
}

/// 📊 The accumulator shapes the standard reducers produce.
///
/// Serializes untagged: a count is a number, a sum is a number, groups are an object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Accumulator {
    Count(u64),
    Sum(f64),
    Groups(BTreeMap<String, f64>),
}

impl fmt::Display for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accumulator::Count(n) => write!(f, "{n}"),
            Accumulator::Sum(total) => write!(f, "{total}"),
            Accumulator::Groups(groups) => {
                let mut first = true;
                for (key, total) in groups {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {total}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// 🎭 The polymorphic reducer — the config-resolved face of the standard trio.
#[derive(Debug, Clone)]
pub enum ReducerBackend {
    Count(Count),
    Sum(Sum),
    GroupSum(GroupSum),
}

impl ReducerBackend {
    /// 🔧 Resolve the reducer from config.
    pub fn from_config(config: &ReducerConfig) -> Self {
        match config {
            ReducerConfig::Count => ReducerBackend::Count(Count),
            ReducerConfig::Sum { column } => ReducerBackend::Sum(Sum::new(column.clone())),
            ReducerConfig::GroupSum {
                group_column,
                value_column,
            } => ReducerBackend::GroupSum(GroupSum::new(group_column.clone(), value_column.clone())),
        }
    }

    /// 0️⃣ The starting accumulator for this reducer.
    pub fn identity(&self) -> Accumulator {
        match self {
            ReducerBackend::Count(_) => Accumulator::Count(0),
            ReducerBackend::Sum(_) => Accumulator::Sum(0.0),
            ReducerBackend::GroupSum(_) => Accumulator::Groups(BTreeMap::new()),
        }
    }
}

impl Reducer for ReducerBackend {
    type Acc = Accumulator;

    fn reduce(&self, acc: Accumulator, batch: &Batch) -> Result<Accumulator, AggregateError> {
        match (self, acc) {
            (ReducerBackend::Count(r), Accumulator::Count(n)) => r.reduce(n, batch).map(Accumulator::Count),
            (ReducerBackend::Sum(r), Accumulator::Sum(total)) => r.reduce(total, batch).map(Accumulator::Sum),
            (ReducerBackend::GroupSum(r), Accumulator::Groups(groups)) => {
                r.reduce(groups, batch).map(Accumulator::Groups)
            }
            (reducer, acc) => Err(AggregateError::InvalidConfiguration(format!(
                "accumulator {acc:?} does not fit reducer {reducer:?}"
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use csv::StringRecord;

    use crate::common::{Batch, SourceId};

    /// 🧪 A batch from literal rows, header first.
    pub(crate) fn batch(source: &str, rows: &[&[&str]]) -> Batch {
        let header = Arc::new(StringRecord::from(rows[0].to_vec()));
        let records = rows[1..]
            .iter()
            .map(|row| StringRecord::from(row.to_vec()))
            .collect();
        Batch::new(SourceId::from(source), header, records, 2, 0)
    }
}
