//! 🔗 The SourceSequencer — many sources in, one batch sequence out.
//!
//! 🎬 *[five CSV files stand in a line. only one may speak at a time.]*
//! *[the sequencer points at the first one. "you. talk." the others wait.]*
//!
//! It opens source *i+1* only after source *i* has run dry and been closed, so at
//! most one file handle is alive at any moment. No interleaving, no fan-out, no
//! "let's read them all in parallel and see what happens". We know what happens.
//!
//! 🧠 Knowledge graph:
//! - validation (non-empty list, positive chunk_size, sane delimiter) happens in `new`, before any I/O
//! - an error from source *i* ends the sequence; batches from *0..i-1* were already handed out
//! - errors pass through unchanged; they already carry the offending `SourceId`

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backends::{CommonSourceConfig, Source, SourceBackend};
use crate::common::{Batch, SourceId};
use crate::error::AggregateError;

#[derive(Debug)]
pub struct SourceSequencer {
    pending: VecDeque<SourceId>,
    current: Option<SourceBackend>,
    config: CommonSourceConfig,
    /// 🏁 set on exhaustion, error or close; after that, only `None`
    finished: bool,
    /// 🧹 malformed records skipped by sources that were already closed
    skipped_closed: u64,
}

impl SourceSequencer {
    /// 🏗️ Validate and line up the sources. Opens nothing.
    pub fn new(sources: Vec<SourceId>, config: CommonSourceConfig) -> Result<Self, AggregateError> {
        if sources.is_empty() {
            return Err(AggregateError::InvalidConfiguration(
                "at least one source is required".to_string(),
            ));
        }
        config.validate()?;
        Ok(Self {
            pending: sources.into(),
            current: None,
            config,
            finished: false,
            skipped_closed: 0,
        })
    }

    /// 🗑️ Close the current source and fold its skip count into ours.
    async fn close_current(&mut self) -> Result<(), AggregateError> {
        if let Some(mut current) = self.current.take() {
            self.skipped_closed += current.skipped_malformed();
            current.close().await?;
        }
        Ok(())
    }

    async fn abort(&mut self, error: AggregateError) -> AggregateError {
        self.finished = true;
        self.pending.clear();
        if let Err(close_error) = self.close_current().await {
            warn!("⚠️ closing after a failure also failed: {}", close_error);
        }
        error
    }
}

#[async_trait]
impl Source for SourceSequencer {
    async fn next_batch(&mut self) -> Result<Option<Batch>, AggregateError> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if self.current.is_none() {
                let Some(source_id) = self.pending.pop_front() else {
                    self.finished = true;
                    return Ok(None);
                };
                debug!("➡️ sequencer moving on to '{}'", source_id);
                match SourceBackend::open(&source_id, &self.config).await {
                    Ok(backend) => self.current = Some(backend),
                    Err(error) => return Err(self.abort(error).await),
                }
            }

            let pulled = match self.current.as_mut() {
                Some(current) => current.next_batch().await,
                None => continue,
            };
            match pulled {
                Ok(Some(batch)) => return Ok(Some(batch)),
                Ok(None) => {
                    if let Err(error) = self.close_current().await {
                        return Err(self.abort(error).await);
                    }
                }
                Err(error) => return Err(self.abort(error).await),
            }
        }
    }

    async fn close(&mut self) -> Result<(), AggregateError> {
        self.finished = true;
        self.pending.clear();
        self.close_current().await
    }

    fn skipped_malformed(&self) -> u64 {
        self.skipped_closed + self.current.as_ref().map_or(0, |current| current.skipped_malformed())
    }
}
