//! 🎬 *[one config walks into a struct. it limits the chunk size. it picks the delimiter.]*
//! *["I belong in the backends module," it said. The module system nodded.]*
//!
//! 📦 **Common Source Config** — the knobs every source reads before it reads anything else.
//!
//! 🧠 Knowledge graph:
//! - `chunk_size`: record ceiling per batch. The whole bounded-memory promise hangs off this number.
//! - `delimiter`: one ASCII byte. Commas by default, because the files said "CSV" on the tin.
//! - `malformed`: `fail` (default) or `skip`. Skipping is opt-in. Silent skipping is how
//!   totals drift and nobody notices until the quarterly review. 💀
//! - `progress`: opt-in progress bar. Off by default so tests and pipes stay quiet.

use serde::{Deserialize, Serialize};

use crate::error::AggregateError;

/// 📏 A million rows per chunk — the same number the old row-counting
/// script used, chosen by someone who was clearly at peace with their RAM.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// 🧾 What to do with a record that doesn't match the header's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// 💀 Abort the run. The default. Numbers you can't trust are worse than no numbers.
    #[default]
    Fail,
    /// 🧹 Skip the record, count it, log it, keep going.
    Skip,
}

/// 📦 Shared configuration handed to every source the sequencer opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonSourceConfig {
    /// 📦 Max records per batch — the memory speed limiter
    #[serde(default = "default_chunk_size", alias = "max_batch_size_docs")]
    pub chunk_size: usize,
    /// ✂️ Field delimiter, must be a single ASCII character
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub malformed: MalformedPolicy,
    /// 📊 Draw a progress bar per source
    #[serde(default)]
    pub progress: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_delimiter() -> char {
    ','
}

impl Default for CommonSourceConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            delimiter: default_delimiter(),
            malformed: MalformedPolicy::default(),
            progress: false,
        }
    }
}

impl CommonSourceConfig {
    /// ✅ Check the knobs before anyone opens a file.
    pub fn validate(&self) -> Result<(), AggregateError> {
        if self.chunk_size == 0 {
            return Err(AggregateError::InvalidConfiguration(
                "chunk_size must be a positive integer".to_string(),
            ));
        }
        self.delimiter_byte().map(|_| ())
    }

    /// ✂️ The delimiter as the single byte the csv parser wants.
    pub fn delimiter_byte(&self) -> Result<u8, AggregateError> {
        if self.delimiter.is_ascii() && self.delimiter != '"' && self.delimiter != '\n' {
            Ok(self.delimiter as u8)
        } else {
            Err(AggregateError::InvalidConfiguration(format!(
                "delimiter {:?} must be a single ASCII character other than a quote or newline",
                self.delimiter
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_zero_chunk_size_is_rejected_before_any_io() {
        let config = CommonSourceConfig {
            chunk_size: 0,
            ..CommonSourceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AggregateError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn the_one_where_emoji_delimiters_are_not_a_thing() {
        let config = CommonSourceConfig {
            delimiter: '🦆',
            ..CommonSourceConfig::default()
        };
        assert!(config.delimiter_byte().is_err());
        let tabs = CommonSourceConfig {
            delimiter: '\t',
            ..CommonSourceConfig::default()
        };
        assert_eq!(tabs.delimiter_byte().ok(), Some(b'\t'));
    }

    #[test]
    fn the_one_where_an_empty_table_gets_every_default() {
        let config: CommonSourceConfig =
            toml::from_str("").expect("💀 empty TOML should fall back to defaults");
        assert_eq!(config, CommonSourceConfig::default());
        assert_eq!(config.chunk_size, 1_000_000);
        assert_eq!(config.malformed, MalformedPolicy::Fail);
    }

    #[test]
    fn the_one_where_skip_is_spelled_out_on_purpose() {
        let config: CommonSourceConfig = toml::from_str(
            r#"
            chunk_size = 7
            malformed = "skip"
            "#,
        )
        .expect("💀 lenient config should parse");
        assert_eq!(config.chunk_size, 7);
        assert_eq!(config.malformed, MalformedPolicy::Skip);
    }
}
