//! Document store contract and two implementations.
//!
//! The pipeline needs three things from a store: upsert a record by key,
//! update the download status of a key, and test a key for existence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use folio_fetch::{DownloadReport, DownloadStatus, RecordKey, sanitize_component};
use folio_fs::{AtomicWriteOptions, atomic_read, atomic_write};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::CanonicalRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Fs(#[from] folio_fs::Error),

    #[error("failed to encode record {key}: {source}")]
    Encode {
        key:    RecordKey,
        source: serde_json::Error,
    },

    #[error("stored document {} is corrupt: {source}", path.display())]
    Decode {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[error("no stored record for {0}")]
    Missing(RecordKey),
}

/// The `download_status` field of a stored record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    pub status:    DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256:    Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason:    Option<String>,
}

impl DownloadState {
    pub fn from_report(report: &DownloadReport, target: &Path) -> Self {
        Self {
            status:    report.status,
            byte_size: report.byte_size,
            sha256:    report.sha256.clone(),
            file_path: (report.status == DownloadStatus::Succeeded).then(|| target.to_path_buf()),
            reason:    report.reason.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record:          CanonicalRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_status: Option<DownloadState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Same key, same content: nothing written.
    Unchanged,
    /// Same key, revised content; the download status is kept.
    Updated,
}

pub trait DocumentStore: Send + Sync {
    fn upsert_record(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, StoreError>;

    /// Fails with [`StoreError::Missing`] if the record was never upserted.
    fn update_download_status(&self, key: &RecordKey, state: DownloadState) -> Result<(), StoreError>;

    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError>;

    fn get(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError>;
}

fn merge(existing: Option<StoredRecord>, record: &CanonicalRecord) -> (UpsertOutcome, Option<StoredRecord>) {
    match existing {
        None => (
            UpsertOutcome::Inserted,
            Some(StoredRecord {
                record:          record.clone(),
                download_status: None,
            }),
        ),
        Some(stored) if stored.record == *record => (UpsertOutcome::Unchanged, None),
        Some(stored) => (
            UpsertOutcome::Updated,
            Some(StoredRecord {
                record:          record.clone(),
                download_status: stored.download_status,
            }),
        ),
    }
}

/// In-process store for tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<RecordKey, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.records.lock().len() }

    pub fn is_empty(&self) -> bool { self.records.lock().is_empty() }

    pub fn records(&self) -> Vec<StoredRecord> { self.records.lock().values().cloned().collect() }
}

impl DocumentStore for MemoryStore {
    fn upsert_record(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, StoreError> {
        let key = record.key();
        let mut records = self.records.lock();
        let (outcome, write) = merge(records.get(&key).cloned(), record);
        if let Some(stored) = write {
            records.insert(key, stored);
        }
        Ok(outcome)
    }

    fn update_download_status(&self, key: &RecordKey, state: DownloadState) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let stored = records
            .get_mut(key)
            .ok_or_else(|| StoreError::Missing(key.clone()))?;
        stored.download_status = Some(state);
        Ok(())
    }

    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.records.lock().contains_key(key))
    }

    fn get(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }
}

/// One JSON document per record at `<dir>/<source>/<source_id>.json`, each
/// replaced atomically.
#[derive(Debug)]
pub struct FsStore {
    dir:  PathBuf,
    // serializes read-modify-write of a document
    lock: Mutex<()>,
}

impl FsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir:  dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn document_path(&self, key: &RecordKey) -> PathBuf {
        self.dir
            .join(sanitize_component(key.source_name.as_str()))
            .join(format!("{}.json", sanitize_component(&key.source_id)))
    }

    fn read(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> {
        let path = self.document_path(key);
        let bytes = match atomic_read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Decode { path, source })
    }

    fn write(&self, key: &RecordKey, stored: &StoredRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(stored).map_err(|source| StoreError::Encode {
            key: key.clone(),
            source,
        })?;
        atomic_write(
            self.document_path(key),
            &bytes,
            AtomicWriteOptions::new().create_dirs(true),
        )?;
        Ok(())
    }
}

impl DocumentStore for FsStore {
    fn upsert_record(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, StoreError> {
        let key = record.key();
        let _guard = self.lock.lock();
        let (outcome, write) = merge(self.read(&key)?, record);
        if let Some(stored) = write {
            self.write(&key, &stored)?;
        }
        tracing::trace!(%key, ?outcome, "upserted record");
        Ok(outcome)
    }

    fn update_download_status(&self, key: &RecordKey, state: DownloadState) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut stored = self.read(key)?.ok_or_else(|| StoreError::Missing(key.clone()))?;
        stored.download_status = Some(state);
        self.write(key, &stored)
    }

    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.document_path(key).is_file())
    }

    fn get(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> { self.read(key) }
}
