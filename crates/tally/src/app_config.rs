//! 🔧 App Configuration — TOML, env vars, and CLI flags, folded into one struct.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Layers, lowest precedence first:
//! 1. serde defaults (chunk_size 1,000,000, delimiter `,`, count, table)
//! 2. `TALLY_*` environment variables, `__` for nesting (`TALLY_READER__CHUNK_SIZE=5000`)
//! 3. the TOML file, if one was given
//! 4. CLI overrides, which win every argument they show up to

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backends::{CommonSourceConfig, MalformedPolicy};
use crate::common::SourceId;
use crate::reducers::ReducerConfig;
pub use crate::reporters::{OutputConfig, OutputFormat};

/// 📦 Everything a run needs to know about itself.
///
/// ```toml
/// sources = ["insurance_data_2020.csv", "insurance_data_2021.csv"]
///
/// [reader]
/// chunk_size = 1000000
/// malformed = "skip"
///
/// [reducer]
/// kind = "sum"
/// column = "gwp"
///
/// [output]
/// format = "json"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppConfig {
    /// 📡 In order. Each is a CSV path or a `synthetic:<year>:<rows>` generator.
    #[serde(default)]
    pub sources: Vec<SourceId>,
    #[serde(default, alias = "common_config")]
    pub reader: CommonSourceConfig,
    #[serde(default)]
    pub reducer: ReducerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// 🎛️ The `[reader]` fields a command line may override. `None` = leave it alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReaderOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malformed: Option<MalformedPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<bool>,
}

impl ReaderOverrides {
    fn is_empty(&self) -> bool {
        self.chunk_size.is_none() && self.delimiter.is_none() && self.malformed.is_none() && self.progress.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl OutputOverrides {
    fn is_empty(&self) -> bool {
        self.format.is_none() && self.file.is_none()
    }
}

/// 🎛️ The top layer: whatever the command line said. Empty fields serialize to nothing
/// so the layers underneath show through.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceId>,
    #[serde(skip_serializing_if = "ReaderOverrides::is_empty")]
    pub reader: ReaderOverrides,
    /// 🔄 replaces the whole `[reducer]` table, never half of it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reducer: Option<ReducerConfig>,
    #[serde(skip_serializing_if = "OutputOverrides::is_empty")]
    pub output: OutputOverrides,
}

/// 🚀 Load the config from env vars, an optional TOML file, and CLI overrides.
///
/// - `config_file_name` None → env vars and overrides only. No implicit `tally.toml` here;
///   the CLI decides whether a default file exists.
/// - The `[reducer]` table is replaced wholesale by an override, so a `sum` from the command
///   line never inherits a stale `group_column` from the file.
///
/// 💀 Errors if the merged result doesn't parse or there are no sources.
pub fn load_config(config_file_name: Option<&Path>, overrides: ConfigOverrides) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {}",
        config_file_name.map_or_else(|| "<env + flags only>".to_string(), |p| p.display().to_string())
    );

    let config = Figment::new().merge(Env::prefixed("TALLY_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let reducer_override = overrides.reducer.clone();
    let config = config.merge(Serialized::defaults(overrides));

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}', environment variables (TALLY_*) and flags. \
             The file exists in our hearts, but apparently not in valid TOML.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (TALLY_*) and flags. \
                 No file was provided, this one's all on the environment."
            .to_string(),
    };

    let mut app_config: AppConfig = config.extract().context(context_msg)?;
    // -- figment merges tables key by key; a reducer override must not keep keys from below
    if let Some(reducer) = reducer_override {
        app_config.reducer = reducer;
    }

    if app_config.sources.is_empty() {
        anyhow::bail!("💀 No sources configured. Pass file paths, or set `sources = [...]` in the config file.");
    }
    app_config
        .reader
        .validate()
        .context("💀 The [reader] section is not usable")?;

    Ok(app_config)
}
