//! Configuration file parser for ~/.config/feedreader/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid utc_offset_minutes {0}: must be a multiple of 15 within -720..=840")]
    InvalidOffset(i32),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `None` means `feedreader.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Local timezone as an offset from UTC in minutes. Every stored timestamp
    /// is expressed in this offset.
    pub utc_offset_minutes: i32,

    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,

    /// Retries after HTTP 429, 5xx or a truncated body.
    pub max_retries: u32,

    /// First retry delay; doubled on every further retry.
    pub retry_base_delay_ms: u64,

    /// Largest feed document accepted.
    pub max_feed_size_bytes: usize,

    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            utc_offset_minutes: 0,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            max_feed_size_bytes: 10 * 1024 * 1024,
            user_agent: concat!("feedreader/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_path",
        "utc_offset_minutes",
        "request_timeout_secs",
        "max_retries",
        "retry_base_delay_ms",
        "max_feed_size_bytes",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Offset outside -720..=840 or not a multiple of 15 → `Err(ConfigError::InvalidOffset)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            utc_offset_minutes = config.utc_offset_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let minutes = self.utc_offset_minutes;
        if !(-720..=840).contains(&minutes) || minutes % 15 != 0 {
            return Err(ConfigError::InvalidOffset(minutes));
        }
        Ok(())
    }

    /// The configured local timezone.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Database location, resolved against the config directory when unset.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feedreader.db"))
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_feed_size: self.max_feed_size_bytes,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
