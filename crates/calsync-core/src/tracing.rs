//! Tracing setup shared by the calsync binaries and tests.
//!
//! ```ignore
//! use calsync_core::tracing::{init_tracing, LogFormat, TracingConfig};
//!
//! init_tracing(TracingConfig::server().with_format(LogFormat::Json))?;
//! ```
//!
//! `RUST_LOG` takes precedence over the configured level.

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("unknown log format {0:?} (expected pretty, compact or json)")]
    UnknownFormat(String),

    #[error("unknown log level {0:?}")]
    UnknownLevel(String),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TracingError::UnknownFormat(other.to_string())),
        }
    }
}

/// Parses a level name such as `info` or `DEBUG`.
pub fn parse_level(s: &str) -> Result<Level, TracingError> {
    Level::from_str(s).map_err(|_| TracingError::UnknownLevel(s.to_string()))
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for calsync crates when `RUST_LOG` is not set.
    pub level: Level,
    pub format: LogFormat,
    /// Include file and line of the call site.
    pub include_location: bool,
    /// Explicit filter directive; overrides both `level` and `RUST_LOG`.
    pub directive: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            include_location: false,
            directive: None,
        }
    }
}

impl TracingConfig {
    /// Preset for the HTTP server: JSON lines with call sites.
    #[must_use]
    pub fn server() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            include_location: true,
            directive: None,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = Some(directive.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, TracingError> {
        if let Some(ref directive) = self.directive {
            return Ok(EnvFilter::try_new(directive)?);
        }
        Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "calsync={level},calsync_core={level},calsync_providers={level},calsync_server={level},tower_http=info",
                level = self.level
            ))
        }))
    }
}

/// Installs the global subscriber. Call once, at startup.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.env_filter()?;
    let location = config.include_location;

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(location)
            .with_line_number(location)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_file(location)
            .with_line_number(location)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_file(location)
            .with_line_number(location)
            .boxed(),
    };

    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(filter).with(layer))?;
    Ok(())
}
