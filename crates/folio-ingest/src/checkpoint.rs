//! Durable per-source progress markers.
//!
//! A checkpoint file is replaced with write-to-temp-then-rename, so a reader
//! sees either the previous checkpoint or the new one, never a torn write.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use folio_fetch::{SourceName, sanitize_component};
use folio_fs::{AtomicWriteOptions, atomic_read, atomic_write};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Progress can no longer be trusted; fatal to a run.
    #[error("failed to write checkpoint: {0}")]
    Write(#[source] folio_fs::Error),

    #[error("failed to read checkpoint: {0}")]
    Read(#[source] folio_fs::Error),

    #[error("checkpoint {} is corrupt: {source}", path.display())]
    Corrupt {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Resume position: the number of items, counted from the start of the
/// query's result list, that are fully committed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub offset: usize,
}

impl Cursor {
    pub fn new(offset: usize) -> Self { Self { offset } }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source_name:       SourceName,
    pub cursor:            Cursor,
    /// Items committed across every run of this query.
    pub items_committed:   u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_fingerprint: Option<String>,
    pub updated_at:        DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir:         PathBuf,
    fingerprint: Option<String>,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir:         dir.into(),
            fingerprint: None,
        }
    }

    /// Scopes the store to one query: checkpoints written for any other
    /// fingerprint are ignored on load.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn path(&self, source: &SourceName) -> PathBuf {
        self.dir
            .join(format!("{}.checkpoint.json", sanitize_component(source.as_str())))
    }

    pub fn load(&self, source: &SourceName) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path(source);
        let bytes = match atomic_read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(CheckpointError::Read(e)),
        };
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)
            .map_err(|source| CheckpointError::Corrupt { path, source })?;

        if self.fingerprint.is_some() && checkpoint.query_fingerprint != self.fingerprint {
            tracing::warn!(
                source = %source,
                stored = ?checkpoint.query_fingerprint,
                "checkpoint belongs to a different query, starting fresh"
            );
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    /// Records that everything before `cursor` is committed, adding
    /// `committed_delta` to the running total.
    pub fn advance(
        &self,
        source: &SourceName,
        cursor: Cursor,
        committed_delta: u64,
    ) -> Result<Checkpoint, CheckpointError> {
        let previous = self.load(source)?.map_or(0, |c| c.items_committed);
        let checkpoint = Checkpoint {
            source_name: source.clone(),
            cursor,
            items_committed: previous.saturating_add(committed_delta),
            query_fingerprint: self.fingerprint.clone(),
            updated_at: Utc::now(),
        };

        let bytes = serde_json::to_vec_pretty(&checkpoint).map_err(CheckpointError::Encode)?;
        atomic_write(
            self.path(source),
            &bytes,
            AtomicWriteOptions::new().sync(true).create_dirs(true),
        )
        .map_err(CheckpointError::Write)?;

        tracing::debug!(source = %source, offset = cursor.offset, total = checkpoint.items_committed, "checkpoint advanced");
        Ok(checkpoint)
    }
}
