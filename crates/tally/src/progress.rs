//! 📊 progress.rs — rows per second, bytes per second, and a guess at when it ends.
//!
//! 🚀 Opt-in (`progress = true` / `--progress`). A CSV source with a progress bar owns one
//! `ProgressMetrics`, feeds it after every batch, and finishes it when the handle closes.
//!
//! ⚠️ Watching the bar does not make the aggregation faster. We checked. 🦆

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

const MIB: u64 = 1024 * 1024;

/// ⏱️ How far back the throughput window looks.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 📦 Bytes, scaled to a unit that makes sense for the size of the whole file.
fn format_bytes(bytes: u64, file_size: u64) -> String {
    if file_size >= 512 * MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if file_size >= MIB {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} bytes")
    }
}

/// 🔢 `10000000` → `10,000,000`. For eyes.
pub(crate) fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// ⏱️ MM:SS, or HH:MM:SS for the long ones.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 🔮 Remaining time by straight-line extrapolation. `None` until there's progress to extrapolate.
fn estimate_remaining(elapsed: Duration, percent: f64) -> Option<Duration> {
    if percent <= 0.0 {
        return None;
    }
    let remaining = elapsed.as_secs_f64() / (percent / 100.0) - elapsed.as_secs_f64();
    (remaining > 0.0).then(|| Duration::from_secs_f64(remaining))
}

#[derive(Debug, Default, Clone, Copy)]
struct Rates {
    rows_per_sec: f64,
    mib_per_sec: f64,
}

/// 📊 Throughput for one source: totals, a sliding-window rate, and the terminal bar.
pub(crate) struct ProgressMetrics {
    source_name: String,
    /// 📏 file size in bytes, 0 when unknown
    total_size: u64,
    bytes: u64,
    rows: u64,
    bar: ProgressBar,
    /// 🔄 (when, bytes, rows) samples inside the rate window
    samples: VecDeque<(Instant, u64, u64)>,
    started: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- ProgressBar has no Debug, and nobody wants one in their logs anyway
        f.debug_struct("ProgressMetrics")
            .field("source_name", &self.source_name)
            .field("total_size", &self.total_size)
            .field("bytes", &self.bytes)
            .field("rows", &self.rows)
            .finish()
    }
}

impl ProgressMetrics {
    pub(crate) fn new(source_name: String, total_size: u64) -> Self {
        let bar = ProgressBar::new(total_size);
        let style = match ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
            Ok(style) => style,
            Err(error) => {
                debug!("🎨 progress template rejected ({}), using the plain bar", error);
                ProgressStyle::default_bar()
            }
        };
        bar.set_style(style.progress_chars("=>-"));

        let started = Instant::now();
        let mut samples = VecDeque::new();
        samples.push_back((started, 0, 0));

        Self {
            source_name,
            total_size,
            bytes: 0,
            rows: 0,
            bar,
            samples,
            started,
        }
    }

    /// 🔄 Account for one more batch and redraw.
    pub(crate) fn update(&mut self, bytes_read: u64, rows_read: u64) {
        self.bytes += bytes_read;
        self.rows += rows_read;
        let rates = self.rates_at(Instant::now());
        self.bar.set_message(self.render(rates));
        self.bar.set_position(self.bytes);
    }

    pub(crate) fn finish(&self) {
        self.bar.finish();
    }

    fn rates_at(&mut self, now: Instant) -> Rates {
        while let Some(&(at, _, _)) = self.samples.front() {
            if now.duration_since(at) > RATE_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.samples.push_back((now, self.bytes, self.rows));

        let Some(&(oldest, oldest_bytes, oldest_rows)) = self.samples.front() else {
            return Rates::default();
        };
        let window = now.duration_since(oldest).as_secs_f64();
        if window <= 0.0 {
            return Rates::default();
        }
        Rates {
            rows_per_sec: self.rows.saturating_sub(oldest_rows) as f64 / window,
            mib_per_sec: self.bytes.saturating_sub(oldest_bytes) as f64 / window / MIB as f64,
        }
    }

    fn percent(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.bytes as f64 / self.total_size as f64 * 100.0).min(100.0)
    }

    /// 🎨 The message above the bar.
    ///
    /// ```text
    /// source: insurance_data_2021.csv
    ///   1,204,331 rows/s      3,100,000 rows
    ///     41.20 MiB/s   107.33 MiB / 346.02 MiB
    ///   00:03 elapsed        00:07 remaining
    /// ```
    fn render(&self, rates: Rates) -> String {
        let elapsed = self.started.elapsed();
        let percent = self.percent();
        let remaining = estimate_remaining(elapsed, percent)
            .map(format_duration)
            .unwrap_or_else(|| "--:--".to_string());

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        let right = |text: String| Cell::new(text).set_alignment(CellAlignment::Right);
        table.add_row(vec![
            right(format!("{} rows/s", format_count(rates.rows_per_sec as u64))),
            right(format!("{} rows", format_count(self.rows))),
        ]);
        table.add_row(vec![
            right(format!("{:.2} MiB/s", rates.mib_per_sec)),
            right(format!(
                "{} / {} ({percent:.1}%)",
                format_bytes(self.bytes, self.total_size),
                format_bytes(self.total_size, self.total_size)
            )),
        ]);
        table.add_row(vec![
            right(format!("{} elapsed", format_duration(elapsed))),
            right(format!("{remaining} remaining")),
        ]);

        format!("source: {}\n{}", self.source_name, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_numbers_get_their_commas() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(10_000_000), "10,000,000");
    }

    #[test]
    fn the_one_where_units_follow_the_file_size() {
        assert_eq!(format_bytes(512, 1000), "512 bytes");
        assert_eq!(format_bytes(2048, 2 * MIB), "2.00 KiB");
        assert_eq!(format_bytes(3 * MIB, 600 * MIB), "3.00 MiB");
    }

    #[test]
    fn the_one_where_time_is_a_clock_face() {
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_the_eta_needs_progress_first() {
        assert_eq!(estimate_remaining(Duration::from_secs(10), 0.0), None);
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 50.0),
            Some(Duration::from_secs(10))
        );
        assert_eq!(estimate_remaining(Duration::from_secs(10), 100.0), None);
    }

    #[test]
    fn the_one_where_updates_accumulate_and_render() {
        let mut metrics = ProgressMetrics::new("a.csv".to_string(), 1_000);
        metrics.update(400, 10);
        metrics.update(100, 5);
        assert_eq!(metrics.rows, 15);
        assert_eq!(metrics.bytes, 500);
        assert_eq!(metrics.percent(), 50.0);

        let message = metrics.render(Rates::default());
        assert!(message.starts_with("source: a.csv"));
        assert!(message.contains("15 rows"));
        metrics.finish();
    }
}
