//! Configuration for the statistics engine
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/statsrec/config.toml)
//! 3. Built-in defaults (lowest priority)

mod logging;

pub use logging::{FileLogging, LoggingConfig};

use crate::error::{RecorderError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine configuration (spec §0.1).
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Path to the SQLite database file. Must not resolve to an in-memory
    /// database (spec §6 Forbidden configuration) — validated by
    /// [`RecorderConfig::build`], not by this struct's constructors alone.
    pub db_path: PathBuf,

    /// Retention window, in days, for short-term rows consulted by the
    /// missing-statistics catch-up routine (spec §4.4).
    pub keep_days_short_term: u32,

    /// How often the task queue worker flushes/yields between chunks of
    /// self-rescheduling work (spec §4.8).
    pub commit_interval: Duration,

    /// Maximum tasks drained from the queue before the worker force-yields.
    pub batch_size: usize,

    /// Retry count for transient DB errors (spec §7c) before a task is
    /// dropped.
    pub max_retries: u32,

    /// Exponential backoff base between retries.
    pub retry_backoff_base: Duration,

    /// Bound on the task queue's channel (backpressure threshold).
    pub channel_buffer: usize,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/statistics.db"),
            keep_days_short_term: 10,
            commit_interval: Duration::from_secs(1),
            batch_size: 100,
            max_retries: 3,
            retry_backoff_base: Duration::from_millis(100),
            channel_buffer: 10_000,
            logging: LoggingConfig::default(),
        }
    }
}

/// Config file structure (subset of `RecorderConfig` that makes sense to
/// persist).
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub db_path: Option<String>,
    pub keep_days_short_term: Option<u32>,
    pub commit_interval_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_backoff_base_ms: Option<u64>,
    pub channel_buffer: Option<usize>,
    pub logging: Option<FileLogging>,
}

impl RecorderConfig {
    /// `true` if `path` would resolve to an ephemeral in-memory SQLite
    /// database (":memory:", "", or a "file:" URI with `mode=memory`).
    /// Construction rejects these per spec §6/§1 Non-goals.
    pub fn is_in_memory_path(path: &Path) -> bool {
        let s = path.to_string_lossy();
        s.is_empty()
            || s == ":memory:"
            || (s.starts_with("file:") && s.contains("mode=memory"))
            || s.contains(":memory:")
    }

    /// Validate and finalize a config built from `Default`/env/file layers.
    /// This is the single choke point that enforces the forbidden
    /// in-memory-database configuration, so every construction path
    /// (`from_env`, `load`, and direct struct literals in tests) must route
    /// through it before the config is handed to [`crate::engine::Engine`].
    pub fn build(self) -> Result<Self> {
        if Self::is_in_memory_path(&self.db_path) {
            return Err(RecorderError::Validation(format!(
                "in-memory SQLite database is not supported: {:?}",
                self.db_path
            )));
        }
        Ok(self)
    }

    /// Get the config file path: ~/.config/statsrec/config.toml
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("statsrec").join("config.toml"))
    }

    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Failed to parse config file {}: {e}", path.display());
                eprintln!("Falling back to defaults; fix or delete the file to silence this.");
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(),
        }
    }

    /// Load configuration: env vars > config file > defaults, then validate.
    pub fn from_env() -> Result<Self> {
        let file = Self::load_file_config();
        let defaults = Self::default();

        let db_path = std::env::var("STATSREC_DB_PATH")
            .ok()
            .or(file.db_path)
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let keep_days_short_term = std::env::var("STATSREC_KEEP_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.keep_days_short_term)
            .unwrap_or(defaults.keep_days_short_term);

        let commit_interval = file
            .commit_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.commit_interval);

        let batch_size = file.batch_size.unwrap_or(defaults.batch_size);

        let max_retries = std::env::var("STATSREC_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file.max_retries)
            .unwrap_or(defaults.max_retries);

        let retry_backoff_base = file
            .retry_backoff_base_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_backoff_base);

        let channel_buffer = file.channel_buffer.unwrap_or(defaults.channel_buffer);

        let logging = LoggingConfig::from_file(file.logging);

        Self {
            db_path,
            keep_days_short_term,
            commit_interval,
            batch_size,
            max_retries,
            retry_backoff_base,
            channel_buffer,
            logging,
        }
        .build()
    }

    /// Load configuration from an explicit file path (used by `statsrec
    /// config --path <file>` and by tests), rather than the default
    /// `~/.config/statsrec/config.toml` location.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RecorderError::Validation(format!("cannot read {path:?}: {e}")))?;
        let file: FileConfig = toml::from_str(&contents)
            .map_err(|e| RecorderError::Validation(format!("invalid config {path:?}: {e}")))?;
        let defaults = Self::default();

        Self {
            db_path: file.db_path.map(PathBuf::from).unwrap_or(defaults.db_path),
            keep_days_short_term: file
                .keep_days_short_term
                .unwrap_or(defaults.keep_days_short_term),
            commit_interval: file
                .commit_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.commit_interval),
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff_base: file
                .retry_backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff_base),
            channel_buffer: file.channel_buffer.unwrap_or(defaults.channel_buffer),
            logging: LoggingConfig::from_file(file.logging),
        }
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_memory_url() {
        let cfg = RecorderConfig {
            db_path: PathBuf::from(":memory:"),
            ..RecorderConfig::default()
        };
        assert!(cfg.build().is_err());
    }

    #[test]
    fn rejects_memory_uri() {
        let cfg = RecorderConfig {
            db_path: PathBuf::from("file::memory:?cache=shared"),
            ..RecorderConfig::default()
        };
        assert!(cfg.build().is_err());
    }

    #[test]
    fn accepts_file_path() {
        let cfg = RecorderConfig {
            db_path: PathBuf::from("/tmp/statsrec-test/statistics.db"),
            ..RecorderConfig::default()
        };
        assert!(cfg.build().is_ok());
    }
}
