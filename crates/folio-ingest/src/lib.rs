//! Resumable academic-paper ingestion.
//!
//! A run pages a [`MetadataSource`] through [`Discovery`], normalizes each
//! raw entry into a [`CanonicalRecord`], upserts it into a
//! [`DocumentStore`], downloads its file through
//! [`folio_fetch::DownloadManager`] and advances a [`Checkpoint`] over the
//! contiguous prefix of finished items. [`Pipeline`] wires these together.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use folio_fetch::ReqwestClient;
//! use folio_ingest::{ArxivSource, FsStore, IngestConfig, Pipeline};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::default();
//! let query = config.query(chrono::Utc::now())?;
//! let client = Arc::new(ReqwestClient::new(&config.download.user_agent, config.request_timeout())?);
//! let source = Arc::new(ArxivSource::new(Arc::clone(&client)));
//! let store = Arc::new(FsStore::new(&config.storage.records_dir));
//!
//! let pipeline = Pipeline::new(config, query, source, client, store)?;
//! let (_cancel, rx) = tokio::sync::watch::channel(false);
//! let summary = pipeline.run(rx).await?;
//! println!("{} downloaded, stopped: {}", summary.downloads_succeeded, summary.stop_reason);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod source;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, Cursor};
pub use config::{ConfigError, IngestConfig};
pub use discovery::{DiscoveredPage, Discovery, DiscoveryError, PageEnd, Pages};
pub use logging::{LogFormat, LoggingError, init_logging};
pub use normalize::{Deduplicator, Rejection, normalize};
pub use pipeline::{Pipeline, PipelineError, RunSummary, StopReason};
pub use progress::CommitTracker;
pub use record::{CanonicalRecord, RawRecord};
pub use source::{ArxivSource, MetadataSource, Page, Query};
pub use store::{DocumentStore, DownloadState, FsStore, MemoryStore, StoreError, StoredRecord, UpsertOutcome};
