//! Logger configuration.
//!
//! Layered with figment, later layers winning:
//!
//! 1. built-in defaults (every field has one)
//! 2. a TOML file, `config/footsole.toml` unless another path is given
//! 3. `FOOTSOLE_`-prefixed environment variables, with `__` separating
//!    section and key: `FOOTSOLE_SESSION__BATCH_ROWS=16`,
//!    `FOOTSOLE_DEVICE__SIDE=left`, `FOOTSOLE_SESSION__DURATION=5m`
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Example
//!
//! ```toml
//! [application]
//! log_level = "debug"
//!
//! [device]
//! name = "FootSole-C3"
//! side = "left"
//!
//! [session]
//! duration = "2m 30s"
//! batch_rows = 32
//!
//! [storage]
//! output_dir = "recordings"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};
use crate::logging::{parse_log_level, OutputFormat};
use crate::session::{SessionConfig, Side};
use crate::transport::stream::DEFAULT_READ_CHUNK_BYTES;

/// Config file the binary reads unless `--config` names another.
pub const DEFAULT_CONFIG_PATH: &str = "config/footsole.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "FOOTSOLE_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Logging and identity.
    pub application: ApplicationConfig,
    /// Which insole to record.
    pub device: DeviceConfig,
    /// Recording parameters.
    pub session: SessionSettings,
    /// Where session files go.
    pub storage: StorageConfig,
}

/// `[application]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Name shown in logs.
    pub name: String,
    /// trace, debug, info, warn or error.
    pub log_level: String,
    /// Log line format.
    pub log_format: OutputFormat,
    /// Log when the session span opens and closes, with its duration.
    pub log_span_events: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "footsole-logger".into(),
            log_level: "info".into(),
            log_format: OutputFormat::Compact,
            log_span_events: false,
        }
    }
}

/// `[device]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised device name to subscribe to.
    pub name: String,
    /// Insole side.
    pub side: Side,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "FootSole-C3".into(),
            side: Side::Right,
        }
    }
}

/// `[session]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Recording time after subscription, e.g. `"60s"` or `"1h 30m"`.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Ignore `duration` and record until the stream ends or the logger is
    /// interrupted.
    pub until_end_of_stream: bool,
    /// Samples per flush. 1 flushes every sample.
    pub batch_rows: usize,
    /// Capacity of the internal queues.
    pub queue_capacity: usize,
    /// Read size for replay and serial sources.
    pub read_chunk_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            until_end_of_stream: false,
            batch_rows: 1,
            queue_capacity: 256,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for session files.
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

impl LoggerConfig {
    /// Layered sources for the file at `path`; a missing file contributes
    /// nothing.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from `path` and the environment, then validate.
    pub fn load_from(path: impl AsRef<Path>) -> AppResult<Self> {
        let config: Self = Self::figment(path).extract()?;
        config.validate().map_err(DaqError::Configuration)?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), String> {
        parse_log_level(&self.application.log_level)?;

        if self.device.name.trim().is_empty() {
            return Err("device.name must not be empty".into());
        }
        if self.session.batch_rows == 0 {
            return Err("session.batch_rows must be at least 1".into());
        }
        if self.session.queue_capacity == 0 {
            return Err("session.queue_capacity must be at least 1".into());
        }
        if !(1..=65536).contains(&self.session.read_chunk_bytes) {
            return Err(format!(
                "session.read_chunk_bytes must be between 1 and 65536, got {}",
                self.session.read_chunk_bytes
            ));
        }
        Ok(())
    }

    /// Effective configuration as TOML, in the layout of the config file.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Configuration(e.to_string()))
    }

    /// Session parameters derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.device.name.clone(),
            side: self.device.side,
            duration: (!self.session.until_end_of_stream).then_some(self.session.duration),
            batch_rows: self.session.batch_rows,
            queue_capacity: self.session.queue_capacity,
            output_dir: self.storage.output_dir.clone(),
            output_path: None,
        }
    }
}
