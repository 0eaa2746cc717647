//! 🎬 *[a source fills with batches. somewhere, a reducer waits.]*
//! *[the clock on the wall reads 2:47am.]*
//! *[nobody asked for this row count. and yet, here we are.]*
//!
//! 🧮 The Aggregator — patient, tireless, and deeply unbothered by how big the input is.
//! It pulls a batch. It folds the batch. It drops the batch. It pulls the next one.
//! It never holds two. That's the whole memory story, and it fits on a napkin.
//!
//! ```text
//!   Idle ──first pull──▶ Running ──exhausted──▶ Completed
//!                           │
//!                           └──any error──▶ Failed   (accumulator discarded)
//!   Idle / Running ──cancel()──▶ Failed
//! ```
//!
//! ⚠️ A failed run reports nothing but the error and how far it got. Partial totals are
//! how dashboards start lying. 🦆

use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::backends::Source;
use crate::error::{AggregateError, RunFailed};
use crate::reducers::Reducer;

/// 🚦 Where a run is in its short, eventful life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// ✅ What a Completed run hands to the reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome<A> {
    pub accumulator: A,
    pub elapsed: Duration,
    pub records: u64,
    pub batches: u64,
    pub skipped_malformed: u64,
}

/// 🧮 Drives one run: pulls batches from a source and folds them with a reducer.
#[derive(Debug)]
pub struct Aggregator<S> {
    source: S,
    state: RunState,
    records: u64,
    batches: u64,
}

impl<S: Source> Aggregator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: RunState::Idle,
            records: 0,
            batches: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// 🔢 Records folded so far. After a failure, this is the diagnostic body count.
    pub fn records_aggregated(&self) -> u64 {
        self.records
    }

    pub fn into_source(self) -> S {
        self.source
    }

    fn transition(&mut self, next: RunState) {
        debug!("🚦 run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// 🛑 Abort from the outside: release the source's handle now.
    ///
    /// An Idle or Running aggregator ends up Failed, so it can never report a total
    /// afterwards. A Completed one keeps its state and just has its source closed.
    pub async fn cancel(&mut self) -> Result<(), AggregateError> {
        if matches!(self.state, RunState::Idle | RunState::Running) {
            self.transition(RunState::Failed);
        }
        self.source.close().await
    }

    async fn fail(&mut self, error: AggregateError) -> RunFailed {
        self.transition(RunState::Failed);
        if let Err(close_error) = self.source.close().await {
            warn!("⚠️ source refused to close after a failed run: {}", close_error);
        }
        warn!(
            "💀 run failed after {} records in {} batches: {}",
            self.records, self.batches, error
        );
        RunFailed {
            error,
            records_aggregated: self.records,
        }
    }

    /// 🚀 Fold every batch into `identity` with `reducer`, left to right.
    ///
    /// Each batch is reduced and dropped before the next one is requested, so peak
    /// memory is one batch plus the accumulator. Runs exactly once per aggregator.
    pub async fn run<R: Reducer>(&mut self, reducer: &R, identity: R::Acc) -> Result<RunOutcome<R::Acc>, RunFailed> {
        if self.state != RunState::Idle {
            return Err(RunFailed {
                error: AggregateError::InvalidConfiguration(format!(
                    "a run can only start from Idle, this one is {:?}",
                    self.state
                )),
                records_aggregated: self.records,
            });
        }

        let started = Instant::now();
        let mut acc = identity;
        self.transition(RunState::Running);

        loop {
            let batch = match self.source.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(error) => return Err(self.fail(error).await),
            };

            let size = batch.len() as u64;
            trace!(
                "🪣 folding {} records ({} bytes) from '{}' starting at line {}",
                size,
                batch.bytes(),
                batch.source_id(),
                batch.first_line()
            );
            acc = match reducer.reduce(acc, &batch) {
                Ok(next) => next,
                Err(error) => return Err(self.fail(error).await),
            };
            drop(batch);

            self.records += size;
            self.batches += 1;
        }

        let skipped_malformed = self.source.skipped_malformed();
        if let Err(error) = self.source.close().await {
            return Err(self.fail(error).await);
        }
        self.transition(RunState::Completed);

        let elapsed = started.elapsed();
        info!(
            "🏁 run completed: {} records in {} batches ({} skipped) in {:.3}s",
            self.records,
            self.batches,
            skipped_malformed,
            elapsed.as_secs_f64()
        );

        Ok(RunOutcome {
            accumulator: acc,
            elapsed,
            records: self.records,
            batches: self.batches,
            skipped_malformed,
        })
    }
}
