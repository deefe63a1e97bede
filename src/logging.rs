//! Tracing subscriber setup for the server binary.
//!
//! `RUST_LOG` overrides the configured filter; `RUST_LOG_FORMAT` overrides the
//! configured output format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::error::{LiveError, LiveResult};

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LiveError::config(format!(
                "unknown log format '{other}', expected compact or json"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Builds the filter: `RUST_LOG` if set, else `directives` (e.g. `info` or
/// `livequery=debug`).
pub fn env_filter(directives: &str) -> LiveResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directives)
        .map_err(|e| LiveError::config(format!("invalid log filter '{directives}': {e}")))
}

/// Installs the global subscriber.
pub fn init(directives: &str, format: LogFormat) -> LiveResult<()> {
    let filter = env_filter(directives)?;
    let format = match std::env::var("RUST_LOG_FORMAT") {
        Ok(value) => value.parse().unwrap_or(format),
        Err(_) => format,
    };

    let layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| LiveError::internal(format!("failed to install log subscriber: {e}")))
}
