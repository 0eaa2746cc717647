//! 🗄️ RunCache — remembers completed reports so the same question isn't asked of the disk twice.
//!
//! Caller-owned and caller-invalidated. There is no global cache and no file watching:
//! if a CSV changed, whoever changed it calls `invalidate_sources`. Only completed runs
//! are ever inserted, so a hit is always a full, honest answer. 🦆

use std::collections::HashMap;

use tracing::debug;

use crate::common::SourceId;
use crate::reducers::ReducerConfig;
use crate::reporters::RunReport;

/// 🔑 What makes two runs "the same run": the ordered source list and the reducer.
///
/// Chunk size is left out on purpose; it never changes the answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub sources: Vec<SourceId>,
    pub reducer: ReducerConfig,
}

impl RunKey {
    pub fn new(sources: Vec<SourceId>, reducer: ReducerConfig) -> Self {
        Self { sources, reducer }
    }

    fn reads(&self, source_id: &SourceId) -> bool {
        self.sources.contains(source_id)
    }
}

#[derive(Debug, Default)]
pub struct RunCache {
    entries: HashMap<RunKey, RunReport>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RunKey) -> Option<&RunReport> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: RunKey, report: RunReport) {
        debug!("🗄️ caching {} over {} sources", key.reducer, key.sources.len());
        self.entries.insert(key, report);
    }

    /// 🧽 Forget every report that read any of `changed`. Returns how many were dropped.
    pub fn invalidate_sources(&mut self, changed: &[SourceId]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !changed.iter().any(|id| key.reads(id)));
        let dropped = before - self.entries.len();
        debug!("🧽 invalidated {} cached reports", dropped);
        dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::reducers::Accumulator;

    fn report(sources: &[&str], rows: u64) -> (RunKey, RunReport) {
        let sources: Vec<SourceId> = sources.iter().map(|s| SourceId::from(*s)).collect();
        let key = RunKey::new(sources.clone(), ReducerConfig::Count);
        let report = RunReport {
            sources,
            reducer: ReducerConfig::Count,
            accumulator: Accumulator::Count(rows),
            elapsed: Duration::from_millis(5),
            records: rows,
            batches: 1,
            skipped_malformed: 0,
        };
        (key, report)
    }

    #[test]
    fn the_one_where_the_cache_remembers_until_told_to_forget() {
        let mut cache = RunCache::new();
        let (both, both_report) = report(&["2020.csv", "2021.csv"], 10);
        let (only_2022, report_2022) = report(&["2022.csv"], 3);
        cache.insert(both.clone(), both_report);
        cache.insert(only_2022.clone(), report_2022);

        assert_eq!(cache.get(&both).map(|r| r.records), Some(10));
        assert_eq!(cache.invalidate_sources(&[SourceId::from("2021.csv")]), 1);
        assert!(cache.get(&both).is_none());
        assert!(cache.get(&only_2022).is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn the_one_where_order_and_reducer_are_part_of_the_question() {
        let mut cache = RunCache::new();
        let (key, rep) = report(&["a.csv", "b.csv"], 2);
        cache.insert(key, rep);

        let (reversed, _) = report(&["b.csv", "a.csv"], 2);
        assert!(cache.get(&reversed).is_none());

        let summed = RunKey::new(
            vec![SourceId::from("a.csv"), SourceId::from("b.csv")],
            ReducerConfig::Sum { column: "gwp".into() },
        );
        assert!(cache.get(&summed).is_none());
        assert_eq!(cache.len(), 1);
    }
}
