//! Rate-gated, quota-bounded downloads with circuit breaking and atomic
//! placement.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - `data` - identifiers, options and task records
//! - `core` - pure transformations (retry schedule, status classes, layout)
//! - `effects` - I/O behind the [`HttpClient`] trait
//!
//! # Key Features
//!
//! - **Per-source pacing**: [`RateGate`] grants are FIFO and never closer
//!   than the source's configured interval, which cannot undercut its floor
//! - **Failure isolation**: [`CircuitBreaker`] fails fast with
//!   [`CircuitOpenError`] while a source is down
//! - **Hard storage ceiling**: [`StorageQuota`] reservations are atomic
//!   across concurrent downloaders
//! - **Single-pass transfer**: bodies are hashed while streaming into a
//!   `folio-fs` staged file, then renamed into place

mod core;
mod data;
mod effects;
mod error;

pub use crate::core::{
    RetryDecision, RetryState, StatusClass, UNCATEGORIZED, classify_status, retry_delay,
    sanitize_component, target_path,
};
pub use data::{
    CircuitConfig, DownloadOptions, DownloadReport, DownloadStatus, DownloadTask, FailureReason,
    RecordKey, RetryPolicy, SourceName,
};
pub use effects::{
    ARXIV_API_FLOOR, ARXIV_FILE_FLOOR, BoxStream, CircuitBreaker, CircuitPermit, CircuitState,
    DEFAULT_FLOOR, DownloadManager, HttpClient, HttpResponse, QuotaSnapshot, QuotaState,
    RateGate, RateGateBuilder, Reservation, StorageQuota, floor_for,
};
pub use error::{CircuitOpenError, FetchError, QuotaExceeded, RateGateError};

#[cfg(feature = "reqwest")]
pub use effects::ReqwestClient;
