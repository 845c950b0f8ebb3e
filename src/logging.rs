//! Process-wide logging setup from an explicit configuration object.
//!
//! Services call [`init`] exactly once at startup. Configuration is data,
//! not environment sniffing, so the same config struct can come from a
//! file, CLI flags, or be built in code.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Errors that can occur while installing the logging subscriber.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid log level '{level}': {source}")]
    InvalidLevel {
        level: String,
        #[source]
        source: tracing::metadata::ParseLevelError,
    },
    #[error("Failed to open log file: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to install logging subscriber: {source}")]
    Init {
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable with full metadata.
    #[default]
    Full,
    /// Human-readable, one terse line per event.
    Compact,
    /// One JSON object per line.
    Json,
}

/// Where log lines are written. Each destination gets its own layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDestination {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// Logging configuration. The defaults log at `info` to stdout in the
/// full human-readable format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_destinations")]
    pub destinations: Vec<LogDestination>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_destinations() -> Vec<LogDestination> {
    vec![LogDestination::Stdout]
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            format: LogFormat::default(),
            destinations: default_destinations(),
        }
    }
}

/// Installs the global logging subscriber described by `config`.
///
/// All fallible setup (level parsing, file opening) happens before the
/// subscriber is installed, so a failed call leaves the process without
/// a global subscriber and a later retry can still succeed.
pub fn init(config: &LogConfig) -> Result<(), Error> {
    let level: Level = config.level.parse().map_err(|source| Error::InvalidLevel {
        level: config.level.clone(),
        source,
    })?;

    let mut writers = Vec::with_capacity(config.destinations.len());
    for destination in &config.destinations {
        let writer = match destination {
            LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogDestination::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| Error::Io { source })?;
                BoxMakeWriter::new(Mutex::new(file))
            }
        };
        writers.push(writer);
    }

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    for writer in writers {
        let layer = match config.format {
            LogFormat::Full => fmt::layer().with_writer(writer).boxed(),
            LogFormat::Compact => fmt::layer().compact().with_writer(writer).boxed(),
            LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        };
        layers.push(layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(LevelFilter::from_level(level))
        .try_init()
        .map_err(|source| Error::Init { source })?;
    Ok(())
}
