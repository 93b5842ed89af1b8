//! Immutable identifiers, options and task records.

mod ids;
mod options;
mod task;

pub use ids::{RecordKey, SourceName};
pub use options::{CircuitConfig, DownloadOptions, RetryPolicy};
pub use task::{DownloadReport, DownloadStatus, DownloadTask, FailureReason};
