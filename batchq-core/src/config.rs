//! Client configuration
//!
//! Configuration can be built in code or loaded from a TOML file
//! (`~/.config/batchq/config.toml` by default).
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/batchq/` (~/.config/batchq/)
//! - Data: `$XDG_DATA_HOME/batchq/` (~/.local/share/batchq/)
//! - State/Logs: `$XDG_STATE_HOME/batchq/` (~/.local/state/batchq/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Returns the default config file path
///
/// `$XDG_CONFIG_HOME/batchq/config.toml` (~/.config/batchq/config.toml)
pub fn config_path() -> PathBuf {
    xdg_config_home().join("batchq").join("config.toml")
}

/// Returns the data directory path (default root for the file event store)
///
/// `$XDG_DATA_HOME/batchq/` (~/.local/share/batchq/)
pub fn data_dir() -> PathBuf {
    xdg_data_home().join("batchq")
}

/// Returns the state directory path (for logs)
///
/// `$XDG_STATE_HOME/batchq/` (~/.local/state/batchq/)
pub fn state_dir() -> PathBuf {
    xdg_state_home().join("batchq")
}

/// Client configuration
///
/// Controls the upload endpoint, chunk sizing, and the retry budget of the
/// drain loop. All fields other than `base_url` have usable defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the ingest service, e.g. `https://ingest.example.com`
    pub base_url: Option<String>,

    /// Maximum number of events uploaded in a single request
    #[serde(default = "default_max_upload_events_at_once")]
    pub max_upload_events_at_once: usize,

    /// Total upload attempts per drain invocation (first try included)
    #[serde(default = "default_upload_retry_count")]
    pub upload_retry_count: u32,

    /// Backoff delay is `coefficient * base^retry_counter` seconds
    #[serde(default = "default_upload_retry_interval_coefficient")]
    pub upload_retry_interval_coefficient: f64,

    /// Exponent base for the backoff delay
    #[serde(default = "default_upload_retry_interval_base")]
    pub upload_retry_interval_base: f64,

    /// Whether the drain loop retries while events remain queued
    #[serde(default = "default_enable_retry_uploading")]
    pub enable_retry_uploading: bool,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Debug mode: propagate per-chunk upload failures instead of
    /// logging them and continuing the drain
    #[serde(default)]
    pub debug: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_upload_events_at_once: default_max_upload_events_at_once(),
            upload_retry_count: default_upload_retry_count(),
            upload_retry_interval_coefficient: default_upload_retry_interval_coefficient(),
            upload_retry_interval_base: default_upload_retry_interval_base(),
            enable_retry_uploading: default_enable_retry_uploading(),
            timeout_secs: default_timeout_secs(),
            debug: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default path, falling back to defaults
    /// when no config file exists
    pub fn load() -> Result<Self> {
        let path = config_path();

        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(ClientConfig::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate configuration, returning an error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.base_url.as_deref() {
            None | Some("") => {
                return Err(Error::Config("base_url is required".to_string()));
            }
            Some(_) => {}
        }
        if self.max_upload_events_at_once == 0 {
            return Err(Error::Config(
                "max_upload_events_at_once must be at least 1".to_string(),
            ));
        }
        if self.upload_retry_count == 0 {
            return Err(Error::Config(
                "upload_retry_count must be at least 1".to_string(),
            ));
        }
        if self.upload_retry_interval_coefficient <= 0.0 {
            return Err(Error::Config(
                "upload_retry_interval_coefficient must be positive".to_string(),
            ));
        }
        if self.upload_retry_interval_base < 1.0 {
            return Err(Error::Config(
                "upload_retry_interval_base must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff delay before retry number `retry_counter + 1`
    ///
    /// With the defaults (coefficient 4, base 2) this yields 4s, 8s, 16s, 32s.
    pub fn retry_delay(&self, retry_counter: u32) -> Duration {
        let secs = self.upload_retry_interval_coefficient
            * self.upload_retry_interval_base.powi(retry_counter as i32);
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// HTTP request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_upload_events_at_once() -> usize {
    400
}

fn default_upload_retry_count() -> u32 {
    5
}

fn default_upload_retry_interval_coefficient() -> f64 {
    4.0
}

fn default_upload_retry_interval_base() -> f64 {
    2.0
}

fn default_enable_retry_uploading() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}
