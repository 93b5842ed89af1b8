use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{RecordKey, SourceName};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    SkippedQuota,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Succeeded | DownloadStatus::Failed | DownloadStatus::SkippedQuota
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::InProgress => "in_progress",
            DownloadStatus::Succeeded => "succeeded",
            DownloadStatus::Failed => "failed",
            DownloadStatus::SkippedQuota => "skipped_quota",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One attempt to materialize a record's file at its deterministic path.
#[derive(Clone, Debug)]
pub struct DownloadTask {
    pub key:         RecordKey,
    /// Upstream serving the file; may differ from the metadata source.
    pub file_source: SourceName,
    pub url:         String,
    pub target_path: PathBuf,
    pub status:      DownloadStatus,
    pub byte_size:   Option<u64>,
}

impl DownloadTask {
    pub fn new(
        key: RecordKey,
        file_source: SourceName,
        url: impl Into<String>,
        target_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key,
            file_source,
            url: url.into(),
            target_path: target_path.into(),
            status: DownloadStatus::Pending,
            byte_size: None,
        }
    }
}

/// Why a download did not succeed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    Permanent(String),
    RetriesExhausted { attempts: u32, last_error: String },
    SourceUnavailable,
    Integrity(String),
    Storage(String),
    Quota(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFound => f.write_str("not found"),
            FailureReason::Permanent(e) => write!(f, "permanent error: {e}"),
            FailureReason::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
            FailureReason::SourceUnavailable => f.write_str("source unavailable"),
            FailureReason::Integrity(e) => write!(f, "integrity: {e}"),
            FailureReason::Storage(e) => write!(f, "storage: {e}"),
            FailureReason::Quota(e) => f.write_str(e),
        }
    }
}

/// Terminal outcome of [`DownloadManager::run`](crate::DownloadManager::run).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadReport {
    pub status:    DownloadStatus,
    pub byte_size: Option<u64>,
    pub sha256:    Option<String>,
    /// Network requests issued for this task.
    pub requests:  u32,
    pub reason:    Option<FailureReason>,
}

impl DownloadReport {
    pub(crate) fn succeeded(byte_size: u64, sha256: String, requests: u32) -> Self {
        Self {
            status: DownloadStatus::Succeeded,
            byte_size: Some(byte_size),
            sha256: Some(sha256),
            requests,
            reason: None,
        }
    }

    pub(crate) fn failed(reason: FailureReason, requests: u32) -> Self {
        let status = match reason {
            FailureReason::Quota(_) => DownloadStatus::SkippedQuota,
            _ => DownloadStatus::Failed,
        };
        Self {
            status,
            byte_size: None,
            sha256: None,
            requests,
            reason: Some(reason),
        }
    }

    pub fn source_unavailable(&self) -> bool {
        self.reason == Some(FailureReason::SourceUnavailable)
    }
}
