//! Configuration loading.
//!
//! `config.toml` lives in `~/.missive/` by default. Every section is
//! optional; missing values fall back to the defaults below.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dispatch::{DEFAULT_BATCH_SIZE, DEFAULT_CLAIM_TIMEOUT_SECS};
use crate::store::DEFAULT_MAX_CONNECTIONS;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Message database settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Dispatch pass settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Message database settings.
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Database file; defaults to `~/.missive/missive.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Dispatch pass settings.
#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    /// Maximum pending messages handed to the transport per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Seconds before another pass may take over a claimed message.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            claim_timeout_secs: default_claim_timeout_secs(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rotated JSON logs; defaults to `~/.missive/logs`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

// Default value functions for serde

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}
fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}
fn default_claim_timeout_secs() -> u64 {
    DEFAULT_CLAIM_TIMEOUT_SECS
}
fn default_log_level() -> String {
    "info".to_owned()
}

/// Resolved filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Root directory (`~/.missive`).
    pub root: PathBuf,
    /// `config.toml` inside the root.
    pub config_toml: PathBuf,
    /// Default database file.
    pub database: PathBuf,
    /// Default log directory.
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Lay out the standard files under `root`.
    pub fn under(root: PathBuf) -> Self {
        Self {
            config_toml: root.join("config.toml"),
            database: root.join("missive.db"),
            logs_dir: root.join("logs"),
            root,
        }
    }
}

impl Config {
    /// Database file to open, falling back to the default location.
    pub fn database_path(&self, paths: &RuntimePaths) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| paths.database.clone())
    }

    /// Log directory to use, falling back to the default location.
    pub fn logs_dir(&self, paths: &RuntimePaths) -> PathBuf {
        self.logging
            .dir
            .clone()
            .unwrap_or_else(|| paths.logs_dir.clone())
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Load configuration from `path`, or defaults if the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

/// Resolve the default config directory (`~/.missive/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".missive"))
}

/// Resolve the standard paths under [`config_dir`].
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    Ok(RuntimePaths::under(config_dir()?))
}
