//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 Source backends pour batches. The aggregator drinks them. One glass at a time,
//! because drinking the whole file at once is how you end up with an OOM killer
//! standing over your process like a disappointed parent.
//!
//! 🎭 This module is the casting agency. Need rows from a CSV file? We've got a backend.
//! Need ten million fake insurance policies to prove memory stays flat? We've got one
//! of those too. It never runs out of policies. It has no actuaries to answer to.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use async_trait::async_trait;
use futures::Stream;

use crate::common::{Batch, SourceId};
use crate::error::AggregateError;

pub(crate) mod common_config;
pub(crate) mod csv_file;
pub(crate) mod synthetic;

// 🎯 Re-export the configs and concrete sources so callers can stay out of the basement.
pub use common_config::{CommonSourceConfig, MalformedPolicy};
pub use csv_file::CsvSource;
pub use synthetic::SyntheticSource;

/// 🚰 A lazy, finite, non-restartable sequence of batches.
///
/// # Contract 📜
/// - `next_batch` returns `Ok(Some(batch))` while records flow, each batch holding at most
///   `chunk_size` records, in source order.
/// - `Ok(None)` = the well is dry. Every later call is also `Ok(None)`.
/// - `Err(...)` aborts the sequence. No resume. No skip. The caller decides what happens next.
/// - `close` releases whatever handle is open, right now, not "eventually". After it, the
///   source is exhausted.
/// - The borrow checker demands `&mut self` because sources have state. And feelings. Mostly state.
#[async_trait]
pub trait Source: std::fmt::Debug + Send {
    /// 📦 Pull the next batch.
    async fn next_batch(&mut self) -> Result<Option<Batch>, AggregateError>;

    /// 🗑️ Release the open handle and end the sequence.
    async fn close(&mut self) -> Result<(), AggregateError>;

    /// 🧹 Records skipped so far under the lenient malformed-record policy.
    fn skipped_malformed(&self) -> u64 {
        0
    }
}

/// 🎭 The many faces of a Source — a polymorphic casting call for record origins.
///
/// The sequencer holds one of these at a time and never needs to know whether the
/// rows come from disk or from a generator with a vivid imagination.
#[derive(Debug)]
pub enum SourceBackend {
    Csv(CsvSource),
    Synthetic(SyntheticSource),
}

impl SourceBackend {
    /// 🚀 Resolve a source id into an open backend.
    ///
    /// `synthetic:<year>:<rows>` summons the generator. Anything else is a path on disk.
    pub async fn open(
        source_id: &SourceId,
        config: &CommonSourceConfig,
    ) -> Result<Self, AggregateError> {
        match SyntheticSource::parse_id(source_id)? {
            Some((year, rows)) => Ok(SourceBackend::Synthetic(SyntheticSource::new(
                source_id.clone(),
                year,
                rows,
                config.chunk_size,
            ))),
            None => Ok(SourceBackend::Csv(
                CsvSource::open(source_id.clone(), config.clone()).await?,
            )),
        }
    }
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_batch(&mut self) -> Result<Option<Batch>, AggregateError> {
        match self {
            SourceBackend::Csv(s) => s.next_batch().await,
            SourceBackend::Synthetic(s) => s.next_batch().await,
        }
    }

    async fn close(&mut self) -> Result<(), AggregateError> {
        match self {
            SourceBackend::Csv(s) => s.close().await,
            SourceBackend::Synthetic(s) => s.close().await,
        }
    }

    fn skipped_malformed(&self) -> u64 {
        match self {
            SourceBackend::Csv(s) => s.skipped_malformed(),
            SourceBackend::Synthetic(s) => s.skipped_malformed(),
        }
    }
}

/// 🌊 Turn any source into a `Stream` of batches, for callers who speak `futures`.
///
/// The stream ends after the first error, same as the source itself.
pub fn into_stream<S: Source>(source: S) -> impl Stream<Item = Result<Batch, AggregateError>> {
    futures::stream::try_unfold(source, |mut source| async move {
        Ok(source.next_batch().await?.map(|batch| (batch, source)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn the_one_where_a_synthetic_spec_opens_the_generator() {
        let config = CommonSourceConfig {
            chunk_size: 4,
            ..CommonSourceConfig::default()
        };
        let backend = SourceBackend::open(&SourceId::from("synthetic:2021:10"), &config)
            .await
            .expect("💀 synthetic specs never touch the disk");
        assert!(matches!(backend, SourceBackend::Synthetic(_)));
    }

    #[tokio::test]
    async fn the_one_where_a_missing_path_is_source_not_found() {
        let the_void = SourceId::from("/definitely/not/here/insurance_data_1999.csv");
        let outcome = SourceBackend::open(&the_void, &CommonSourceConfig::default()).await;
        match outcome {
            Err(AggregateError::SourceNotFound { source_id, .. }) => assert_eq!(source_id, the_void),
            other => panic!("💀 expected SourceNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_stream_sees_every_batch() {
        let config = CommonSourceConfig {
            chunk_size: 3,
            ..CommonSourceConfig::default()
        };
        let backend = SourceBackend::open(&SourceId::from("synthetic:2022:8"), &config)
            .await
            .expect("💀 generator should open");
        let batches: Vec<Batch> = into_stream(backend)
            .try_collect()
            .await
            .expect("💀 generator should not fail");
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 2]);
    }
}
