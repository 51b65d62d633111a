//! User configuration in `~/.tripwatch/config.ini`.
//!
//! [`ConfigFile`] mirrors the INI layout section by section. Missing keys
//! keep their defaults; a key that is present but malformed is an error.
//! The typed runtime configs ([`TrackingConfig`], [`PositionConfig`],
//! [`ProviderEndpoints`]) are derived from it.
//!
//! # Example
//!
//! ```
//! use tripwatch::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! let tracking = config.tracking.to_tracking_config();
//! assert_eq!(tracking.scheduler.interval.as_millis(), 5000);
//! ```

mod parser;
mod writer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::position::PositionConfig;
use crate::provider::{ProviderEndpoints, DEFAULT_TIMEOUT_SECS};
use crate::scheduler::{SchedulerConfig, StopPolicy, DEFAULT_INTERVAL, DEFAULT_MAX_JITTER};
use crate::session::TrackingConfig;
use crate::store::{StoreConfig, DEFAULT_ALPHA, DEFAULT_ASSUMED_SPEED_KMPH};

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "tripwatch.log";

/// Default log level when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the config file
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// Failed to write the config file
    #[error("Failed to write config file: {0}")]
    Write(String),

    /// A key is present but its value is unusable
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create the config directory
    #[error("Failed to create config directory: {0}")]
    Directory(std::io::Error),
}

/// `[tracking]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub interval_ms: u64,
    pub max_jitter_ms: u64,
    pub smoothing_alpha: f64,
    pub assumed_speed_kmph: f64,
    pub stop_policy: StopPolicy,
    pub deep_search: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
            max_jitter_ms: DEFAULT_MAX_JITTER.as_millis() as u64,
            smoothing_alpha: DEFAULT_ALPHA,
            assumed_speed_kmph: DEFAULT_ASSUMED_SPEED_KMPH,
            stop_policy: StopPolicy::default(),
            deep_search: true,
        }
    }
}

impl TrackingSettings {
    pub fn to_tracking_config(&self) -> TrackingConfig {
        TrackingConfig::default()
            .with_scheduler(
                SchedulerConfig::default()
                    .with_interval(Duration::from_millis(self.interval_ms))
                    .with_max_jitter(Duration::from_millis(self.max_jitter_ms))
                    .with_stop_policy(self.stop_policy),
            )
            .with_store(
                StoreConfig::default()
                    .with_alpha(self.smoothing_alpha)
                    .with_assumed_speed_kmph(self.assumed_speed_kmph),
            )
            .with_deep_search(self.deep_search)
    }
}

/// `[provider]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub matrix_url: Option<String>,
    pub route_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            matrix_url: None,
            route_url: None,
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ProviderSettings {
    pub fn with_matrix_url(mut self, url: impl Into<String>) -> Self {
        self.matrix_url = Some(url.into());
        self
    }

    pub fn with_route_url(mut self, url: impl Into<String>) -> Self {
        self.route_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Endpoints for the HTTP provider, or `None` until both URLs are set.
    pub fn endpoints(&self) -> Option<ProviderEndpoints> {
        let matrix = self.matrix_url.as_deref()?;
        let route = self.route_url.as_deref()?;
        let endpoints = ProviderEndpoints::new(matrix, route);
        Some(match &self.api_key {
            Some(key) => endpoints.with_api_key(key.as_str()),
            None => endpoints,
        })
    }
}

/// `[position]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSettings {
    pub watch_interval_ms: u64,
    pub publish_url: Option<String>,
    pub participant_name: Option<String>,
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            watch_interval_ms: crate::position::DEFAULT_WATCH_INTERVAL.as_millis() as u64,
            publish_url: None,
            participant_name: None,
        }
    }
}

impl PositionSettings {
    pub fn to_position_config(&self, participant_id: impl Into<String>) -> PositionConfig {
        let config = PositionConfig::new(participant_id)
            .with_watch_interval(Duration::from_millis(self.watch_interval_ms));
        match &self.participant_name {
            Some(name) => config.with_name(name.as_str()),
            None => config,
        }
    }
}

/// `[telemetry]` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySettings {
    /// Collector endpoint; records go to the log when unset.
    pub url: Option<String>,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: config_directory().join("logs"),
            file: DEFAULT_LOG_FILE.to_string(),
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub tracking: TrackingSettings,
    pub provider: ProviderSettings,
    pub position: PositionSettings,
    pub telemetry: TelemetrySettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load configuration from the default path (~/.tripwatch/config.ini).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parser::parse_ini(&ini)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Directory)?;
        }
        let content = writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigError::Write(e.to_string()))
    }

    /// Renders the file as it would be saved.
    pub fn to_config_string(&self) -> String {
        writer::to_config_string(self)
    }
}

/// Get the path to the config directory (~/.tripwatch).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tripwatch")
}

/// Get the path to the config file (~/.tripwatch/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
