#![forbid(unsafe_code)]

//! Subscriber setup for binaries and harnesses.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! embedder's call. These helpers cover the common cases: human-readable
//! output filtered by `RUST_LOG` (falling back to a default directive) and,
//! with the `tracing-json` feature, one JSON object per line.

use std::fmt;

use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "tether=info";

/// Failure to install a global subscriber.
#[derive(Debug)]
pub enum LoggingError {
    /// The filter directive did not parse.
    Filter(String),
    /// A global subscriber was already installed.
    AlreadyInstalled(String),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(msg) => write!(f, "invalid log filter: {msg}"),
            Self::AlreadyInstalled(msg) => write!(f, "subscriber already installed: {msg}"),
        }
    }
}

impl std::error::Error for LoggingError {}

fn filter(default_filter: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| LoggingError::Filter(e.to_string())),
    }
}

/// Install a human-readable fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn init_logging(default_filter: &str) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter)?)
        .with_target(true)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}

/// Install a JSON-lines subscriber.
#[cfg(feature = "tracing-json")]
pub fn init_json_logging(default_filter: &str) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(default_filter)?)
        .with_current_span(true)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}
