//! Tracing setup for the logger binary and tests.
//!
//! Everything in the crate logs through `tracing` macros; this module only
//! installs the subscriber. `RUST_LOG` overrides the configured level, e.g.
//! `RUST_LOG=footsole_daq::protocol=trace` to see every resync in detail.
//!
//! # Example
//! ```no_run
//! use footsole_daq::config::{LoggerConfig, DEFAULT_CONFIG_PATH};
//! use footsole_daq::logging;
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoggerConfig::load_from(DEFAULT_CONFIG_PATH)?;
//! logging::init_from_config(&config)?;
//! info!("Logger started");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggerConfig;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored (development).
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event (log aggregation).
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Level,
    /// Output format.
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events (session start/end timing).
    pub with_span_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
        }
    }
}

impl TracingConfig {
    /// Options from the `[application]` section.
    pub fn from_config(config: &LoggerConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            with_span_events: config.application.log_span_events,
        })
    }
}

/// Install the subscriber described by the `[application]` section.
pub fn init_from_config(config: &LoggerConfig) -> Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

/// Install a global subscriber.
///
/// Idempotent: returns `Ok(())` if a global subscriber is already set, which
/// keeps it safe to call from tests.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));
    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_ansi(true)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {e}"))
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}
