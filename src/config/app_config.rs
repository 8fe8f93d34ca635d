//! Application configuration: instrument address, storage paths and
//! recording parameters as operator-tunable TOML values.
//!
//! Every field has a default, so an empty or partial file is valid.

use super::defaults;
use crate::types::SetupOption;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "FBG_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "fbg_config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error ({}): {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with [`AppConfig::load`] which searches:
/// 1. `$FBG_CONFIG`
/// 2. `./fbg_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub instrument: InstrumentConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub recording: RecordingConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to a non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let i = &self.instrument;
        let r = &self.recording;

        if i.host.trim().is_empty() {
            errors.push("instrument.host must not be empty".to_string());
        }
        if i.command_port == 0 {
            errors.push("instrument.command_port must be non-zero".to_string());
        }
        if i.streaming_port == 0 {
            errors.push("instrument.streaming_port must be non-zero".to_string());
        }
        if i.command_port == i.streaming_port {
            errors.push("instrument.command_port and streaming_port must differ".to_string());
        }
        if i.connect_timeout_secs == 0 {
            errors.push("instrument.connect_timeout_secs must be positive".to_string());
        }
        if i.drain_idle_ms == 0 {
            errors.push("instrument.drain_idle_ms must be positive".to_string());
        }
        if i.divider_options.is_empty() {
            errors.push("instrument.divider_options must not be empty".to_string());
        }
        if i.divider_options.contains(&0) {
            errors.push("instrument.divider_options must not contain 0".to_string());
        }

        if !(r.flush_interval_secs.is_finite() && r.flush_interval_secs > 0.0) {
            errors.push(format!(
                "recording.flush_interval_secs must be a positive number (got {})",
                r.flush_interval_secs
            ));
        }
        if r.dequeue_timeout_ms == 0 {
            errors.push("recording.dequeue_timeout_ms must be positive".to_string());
        }
        if r.duration_secs == Some(0) {
            errors.push("recording.duration_secs must be positive when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Instrument
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_command_port")]
    pub command_port: u16,

    #[serde(default = "default_streaming_port")]
    pub streaming_port: u16,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Idle time that ends the post-stream drain (ms)
    #[serde(default = "default_drain_idle_ms")]
    pub drain_idle_ms: u64,

    /// Streaming dividers the client accepts
    #[serde(default = "default_divider_options")]
    pub divider_options: Vec<u32>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            command_port: default_command_port(),
            streaming_port: default_streaming_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            drain_idle_ms: default_drain_idle_ms(),
            divider_options: default_divider_options(),
        }
    }
}

impl InstrumentConfig {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub const fn drain_idle(&self) -> Duration {
        Duration::from_millis(self.drain_idle_ms)
    }
}

fn default_host() -> String {
    defaults::INSTRUMENT_HOST.to_string()
}
const fn default_command_port() -> u16 {
    crate::protocol::COMMAND_PORT
}
const fn default_streaming_port() -> u16 {
    crate::protocol::PEAK_STREAMING_PORT
}
const fn default_connect_timeout_secs() -> u64 {
    defaults::CONNECT_TIMEOUT_SECS
}
const fn default_drain_idle_ms() -> u64 {
    defaults::DRAIN_IDLE_MS
}
fn default_divider_options() -> Vec<u32> {
    defaults::DIVIDER_OPTIONS.to_vec()
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Holds the lock file; relative database and status paths resolve here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_database")]
    pub database: PathBuf,

    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: default_database(),
            status_file: default_status_file(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database)
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join(&self.status_file)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}
fn default_database() -> PathBuf {
    PathBuf::from(defaults::DATABASE_NAME)
}
fn default_status_file() -> PathBuf {
    PathBuf::from(defaults::STATUS_FILE_NAME)
}

// ============================================================================
// Recording
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Setup loaded at start-up
    #[serde(default)]
    pub setup: SetupOption,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: f64,

    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,

    /// Stop recording after this long; unset records until interrupted
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            setup: SetupOption::default(),
            flush_interval_secs: default_flush_interval_secs(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            duration_secs: None,
        }
    }
}

impl RecordingConfig {
    pub fn writer_settings(&self) -> crate::pipeline::WriterSettings {
        crate::pipeline::WriterSettings {
            flush_interval: Duration::from_secs_f64(self.flush_interval_secs),
            dequeue_timeout: Duration::from_millis(self.dequeue_timeout_ms),
        }
    }
}

const fn default_flush_interval_secs() -> f64 {
    defaults::FLUSH_INTERVAL_SECS
}
const fn default_dequeue_timeout_ms() -> u64 {
    defaults::DEQUEUE_TIMEOUT_MS
}
