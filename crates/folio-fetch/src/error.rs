//! Error types for folio-fetch.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::core::{StatusClass, classify_status};
use crate::data::SourceName;

/// Transport and placement failures of a single request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("response body interrupted: {0}")]
    Body(String),

    #[error("truncated body: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Fs(#[from] folio_fs::Error),

    #[error("integrity check failed: {0}")]
    Integrity(#[from] folio_verify::VerificationError),
}

impl FetchError {
    /// Whether retrying the same request may succeed: timeouts, dropped
    /// connections, truncated bodies, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                classify_status(*status) == StatusClass::Retryable
            }
            FetchError::Timeout
            | FetchError::Connect(_)
            | FetchError::Network(_)
            | FetchError::Body(_)
            | FetchError::Truncated { .. } => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status, .. } if classify_status(*status) == StatusClass::NotFound)
    }

    /// Failures that happen on our side of the wire and say nothing about the
    /// health of the upstream.
    pub fn is_local(&self) -> bool {
        matches!(self, FetchError::Io(_) | FetchError::Fs(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A reservation that would push usage past the storage ceiling.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("storage quota exceeded: requested {requested} bytes, {available} of {limit} available")]
pub struct QuotaExceeded {
    pub requested: u64,
    pub available: u64,
    pub limit:     u64,
}

/// Fail-fast rejection from an open circuit. No I/O was attempted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("circuit open for source {source_name}, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub source_name: SourceName,
    pub retry_after: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateGateError {
    #[error("interval {requested:?} for {source_name} is below its floor of {floor:?}")]
    BelowFloor {
        source_name: SourceName,
        requested:   Duration,
        floor:       Duration,
    },

    #[error("no rate gate configured for source {0}")]
    UnknownSource(SourceName),
}
