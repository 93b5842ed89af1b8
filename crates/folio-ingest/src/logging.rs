//! Subscriber setup for the `folio` binary and embedders.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to every
//! target. Output goes to stderr, as human-readable text or one JSON object
//! per event.

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {message}")]
    Filter { filter: String, message: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggingError::Filter {
            filter:  level.to_string(),
            message: e.to_string(),
        })
}

pub fn init_logging(level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let filter = env_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
    };
    installed.map_err(|_| LoggingError::AlreadyInstalled)
}
