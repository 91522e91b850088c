//! TOML configuration for `zk`.
//!
//! Every section is optional. A missing file is only an error when the
//! caller asks for it explicitly via [`load_config`].
//!
//! ```toml
//! [notes]
//! directory = "~/notes"
//! extensions = ["md"]
//! recursive = true
//!
//! [cache]
//! enabled = true
//! path = "~/.cache/zk"
//!
//! [query]
//! default_format = "table"
//! default_limit = 200
//!
//! [logging]
//! level = "warn"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

use zettel_core::query::OutputFormat;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub notes: NotesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotesConfig {
    /// Default root for queries whose spec names no directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            directory: None,
            extensions: default_extensions(),
            recursive: default_recursive(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}
fn default_recursive() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Directory holding cache blobs. Defaults to `<user cache dir>/zk`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            path: None,
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_format")]
    pub default_format: String,
    /// Applied when a spec sets no `output.limit`.
    #[serde(default)]
    pub default_limit: Option<usize>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            default_limit: None,
        }
    }
}

fn default_format() -> String {
    "table".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

impl Config {
    /// The configured default output format. Validated at load time.
    pub fn default_format(&self) -> Result<OutputFormat> {
        self.query
            .default_format
            .parse()
            .with_context(|| "query.default_format")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.notes.directory = config.notes.directory.as_deref().map(expand_tilde);
    config.cache.path = config.cache.path.as_deref().map(expand_tilde);
    config.notes.extensions = config
        .notes
        .extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_string())
        .filter(|ext| !ext.is_empty())
        .collect();

    if config.notes.extensions.is_empty() {
        bail!("notes.extensions must name at least one extension");
    }

    if config.query.default_limit == Some(0) {
        bail!("query.default_limit must be >= 1");
    }

    config.default_format()?;

    if config.logging.level.parse::<LevelFilter>().is_err() {
        bail!(
            "Unknown logging level: '{}'. Must be off, error, warn, info, debug, or trace.",
            config.logging.level
        );
    }

    Ok(config)
}

/// Like [`load_config`], but an absent file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        Ok(Config::default())
    }
}

/// Replace a leading `~` with the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
