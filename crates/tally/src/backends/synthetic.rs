//! # Previously, on Tally...
//!
//! 🎬 The actuaries wanted fifty million rows to test with. Nobody wanted to ship
//! fifty million rows of fixtures in a git repo. So someone wrote a source that
//! makes them up on the spot, deterministically, one chunk at a time, and forgets
//! each chunk the moment it's handed over.
//!
//! That someone was this module.
//!
//! [`SyntheticSource`] produces insurance-shaped records with the same columns the
//! data generators write (`sl, insured_type, insured_group, year, loss_ratio,
//! filter_loss_ratio, profit, insured, gwp, claim_count`). Same year + same row =
//! same values, every run, so tests can assert on totals.
//!
//! ✅ No disk I/O. No file handles. It exists to prove that memory stays flat no
//! matter how many rows go by, without anyone having to generate a 5 GB file first.
//! 🦆

use std::sync::Arc;

use async_trait::async_trait;
use csv::StringRecord;

use crate::backends::Source;
use crate::common::{Batch, SourceId};
use crate::error::AggregateError;

const ID_PREFIX: &str = "synthetic:";

/// 🏷️ The columns every synthetic record carries, in order.
pub const SYNTHETIC_COLUMNS: [&str; 10] = [
    "sl",
    "insured_type",
    "insured_group",
    "year",
    "loss_ratio",
    "filter_loss_ratio",
    "profit",
    "insured",
    "gwp",
    "claim_count",
];

const INSURED_TYPES: [&str; 4] = ["Health", "Life", "Auto", "Property"];
const INSURED_GROUPS: [&str; 4] = ["Group A", "Group B", "Group C", "Group D"];

/// 🎲 splitmix64 — tiny, fast, and deterministic. A dice that always rolls the same for the same seed.
fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// 📦 The world's most imaginative data source.
#[derive(Debug)]
pub struct SyntheticSource {
    source_id: SourceId,
    header: Arc<StringRecord>,
    year: u16,
    total_rows: u64,
    chunk_size: usize,
    /// 🔢 rows already handed out
    emitted: u64,
    /// 🔒 once closed, forever closed
    closed: bool,
}

impl SyntheticSource {
    pub fn new(source_id: SourceId, year: u16, total_rows: u64, chunk_size: usize) -> Self {
        Self {
            source_id,
            header: Arc::new(StringRecord::from(SYNTHETIC_COLUMNS.to_vec())),
            year,
            total_rows,
            chunk_size,
            emitted: 0,
            closed: false,
        }
    }

    /// 🔍 `synthetic:<year>:<rows>` → `Some((year, rows))`, anything without the prefix → `None`.
    pub fn parse_id(source_id: &SourceId) -> Result<Option<(u16, u64)>, AggregateError> {
        let Some(rest) = source_id.as_str().strip_prefix(ID_PREFIX) else {
            return Ok(None);
        };
        let invalid = || {
            AggregateError::InvalidConfiguration(format!(
                "synthetic source '{source_id}' must look like synthetic:<year>:<rows>"
            ))
        };
        let (year, rows) = rest.split_once(':').ok_or_else(invalid)?;
        let year = year.trim().parse::<u16>().map_err(|_| invalid())?;
        let rows = rows.trim().parse::<u64>().map_err(|_| invalid())?;
        Ok(Some((year, rows)))
    }

    /// 🏭 Row `sl` (1-based) for this source's year. Pure function of (year, sl).
    pub fn record(&self, sl: u64) -> StringRecord {
        let seed = (u64::from(self.year) << 40) ^ sl;
        let r = |salt: u64| splitmix64(seed.wrapping_mul(31).wrapping_add(salt));
        let unit = |salt: u64| (r(salt) >> 11) as f64 / (1u64 << 53) as f64;

        let insured_type = INSURED_TYPES[(r(1) % 4) as usize];
        let insured_group = INSURED_GROUPS[(r(2) % 4) as usize];
        let loss_ratio = unit(3);
        let filter_loss_ratio = unit(4);
        let profit = unit(5) * 2_000_000.0 - 1_000_000.0;
        let insured = 1 + r(6) % 999;
        let gwp = 10_000.0 + unit(7) * 40_000.0;
        let claim_count = r(8) % 100;

        StringRecord::from(vec![
            sl.to_string(),
            insured_type.to_string(),
            insured_group.to_string(),
            self.year.to_string(),
            format!("{loss_ratio:.6}"),
            format!("{filter_loss_ratio:.6}"),
            format!("{profit:.2}"),
            insured.to_string(),
            format!("{gwp:.2}"),
            claim_count.to_string(),
        ])
    }
}

#[async_trait]
impl Source for SyntheticSource {
    /// 🎯 Make up the next chunk. Nothing from earlier chunks is kept around.
    async fn next_batch(&mut self) -> Result<Option<Batch>, AggregateError> {
        if self.closed || self.emitted >= self.total_rows {
            return Ok(None);
        }

        let remaining = self.total_rows - self.emitted;
        let take = remaining.min(self.chunk_size as u64);
        let first_sl = self.emitted + 1;
        let records: Vec<StringRecord> = (first_sl..first_sl + take).map(|sl| self.record(sl)).collect();
        let bytes = records.iter().map(|r| r.as_slice().len() + r.len()).sum();
        self.emitted += take;

        // -- header is "line 1", so row sl lives on line sl + 1
        Ok(Some(Batch::new(
            self.source_id.clone(),
            self.header.clone(),
            records,
            first_sl + 1,
            bytes,
        )))
    }

    async fn close(&mut self) -> Result<(), AggregateError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_ids_are_parsed_or_politely_refused() {
        let ok = SyntheticSource::parse_id(&SourceId::from("synthetic:2020:10000000"))
            .expect("💀 valid id");
        assert_eq!(ok, Some((2020, 10_000_000)));

        let not_synthetic = SyntheticSource::parse_id(&SourceId::from("insurance_data_2020.csv"))
            .expect("💀 paths are not errors");
        assert_eq!(not_synthetic, None);

        assert!(matches!(
            SyntheticSource::parse_id(&SourceId::from("synthetic:twenty:5")),
            Err(AggregateError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn the_one_where_the_same_row_is_the_same_row() {
        let a = SyntheticSource::new(SourceId::from("a"), 2023, 10, 5);
        let b = SyntheticSource::new(SourceId::from("b"), 2023, 10, 5);
        assert_eq!(a.record(7), b.record(7));
        assert_ne!(a.record(7), a.record(8));

        let row = a.record(7);
        assert_eq!(row.len(), SYNTHETIC_COLUMNS.len());
        assert_eq!(row.get(0), Some("7"));
        assert_eq!(row.get(3), Some("2023"));
        let gwp: f64 = row.get(8).and_then(|v| v.parse().ok()).expect("💀 gwp is numeric");
        assert!((10_000.0..=50_000.0).contains(&gwp));
    }

    #[tokio::test]
    async fn the_one_where_the_generator_runs_dry_on_schedule() {
        let mut source = SyntheticSource::new(SourceId::from("synthetic:2020:5"), 2020, 5, 2);
        let mut sizes = Vec::new();
        while let Some(batch) = source.next_batch().await.expect("💀 never fails") {
            sizes.push((batch.len(), batch.first_line()));
        }
        assert_eq!(sizes, vec![(2, 2), (2, 4), (1, 6)]);
        assert!(source.next_batch().await.expect("💀 still never fails").is_none());
    }

    #[tokio::test]
    async fn the_one_where_close_stops_the_presses() {
        let mut source = SyntheticSource::new(SourceId::from("s"), 2020, 100, 10);
        assert!(source.next_batch().await.expect("💀 first").is_some());
        source.close().await.expect("💀 close");
        assert!(source.next_batch().await.expect("💀 closed").is_none());
    }
}
