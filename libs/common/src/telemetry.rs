//! Tracing subscriber bootstrap shared by the services.

use anyhow::Result;
use std::env;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, one event per line.
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig from environment variables
    ///
    /// # Environment Variables
    /// - `LOG_LEVEL`: default filter (default: "info")
    /// - `LOG_FORMAT`: "json" or "pretty" (default: "pretty")
    pub fn from_env() -> Self {
        let level = env::var("LOG_LEVEL")
            .map(|l| l.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") | Ok("JSON") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self { level, format }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over [`LogConfig::level`]. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init()?,
    }

    Ok(())
}
