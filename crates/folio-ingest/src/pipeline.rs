//! One ingestion run: discover, normalize, persist, download, checkpoint.
//!
//! Discovery and normalization run as a single producer feeding a bounded
//! queue; the consumer keeps at most `download.max_concurrent` downloads in
//! flight. Each queued item carries its position in the result list, and the
//! checkpoint only ever moves over a contiguous run of terminal positions.

use std::fmt;
use std::sync::Arc;

use folio_fetch::{
    CircuitBreaker, CircuitConfig, DownloadManager, DownloadReport, DownloadStatus, DownloadTask,
    HttpClient, QuotaSnapshot, RateGate, RateGateError, SourceName, StorageQuota, target_path,
};
use folio_fs::{disk_usage, sweep_staging};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::checkpoint::{CheckpointError, CheckpointStore, Cursor};
use crate::config::{ConfigError, IngestConfig};
use crate::discovery::{DiscoveredPage, Discovery, DiscoveryError, PageEnd};
use crate::normalize::{Deduplicator, normalize};
use crate::progress::CommitTracker;
use crate::record::RawRecord;
use crate::source::{MetadataSource, Query};
use crate::store::{DocumentStore, DownloadState, StoreError, UpsertOutcome};

/// Run-level failures. Everything per item is folded into the summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("rate gate misconfigured: {0}")]
    RateFloor(#[from] RateGateError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("document store failed: {0}")]
    Store(#[from] StoreError),

    #[error("storage setup failed: {0}")]
    Storage(#[from] folio_fs::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    ResultCapReached,
    Cancelled,
    /// A page could not be fetched; the checkpoint stays before it.
    DiscoveryFailed { offset: usize, error: String },
    SourceUnavailable { source: SourceName },
    AllSourcesUnavailable,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => f.write_str("results exhausted"),
            StopReason::ResultCapReached => f.write_str("result cap reached"),
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::DiscoveryFailed { offset, error } => {
                write!(f, "discovery failed at offset {offset}: {error}")
            }
            StopReason::SourceUnavailable { source } => write!(f, "source {source} unavailable"),
            StopReason::AllSourcesUnavailable => f.write_str("all sources unavailable"),
        }
    }
}

/// Counts per outcome bucket for one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub discovered:          usize,
    pub normalized:          usize,
    pub rejected:            usize,
    /// Records seen earlier in the same run.
    pub duplicates:          usize,
    /// Records stored for the first time.
    pub new_records:         usize,
    pub metadata_only:       usize,
    pub downloads_succeeded: usize,
    pub downloads_failed:    usize,
    pub skipped_quota:       usize,
    pub bytes_downloaded:    u64,
    pub checkpoint:          Cursor,
    pub stop_reason:         StopReason,
    pub quota:               QuotaSnapshot,
}

enum Item {
    /// Terminal without a download.
    Settled { position: usize },
    Download { position: usize, task: DownloadTask },
}

#[derive(Default)]
struct Produced {
    discovered:    usize,
    normalized:    usize,
    rejected:      usize,
    duplicates:    usize,
    new_records:   usize,
    metadata_only: usize,
}

#[derive(Default)]
struct Consumed {
    succeeded: usize,
    failed:    usize,
    skipped:   usize,
    bytes:     u64,
    halted:    bool,
    cursor:    usize,
}

async fn signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|set| *set).await.is_err() {
        // sender gone without signalling: never fires
        std::future::pending::<()>().await;
    }
}

pub struct Pipeline<S, C, D> {
    config:      IngestConfig,
    query:       Query,
    discovery:   Discovery<S>,
    downloads:   Arc<DownloadManager<C>>,
    store:       Arc<D>,
    checkpoints: CheckpointStore,
    breaker:     Arc<CircuitBreaker>,
    quota:       Arc<StorageQuota>,
    file_source: SourceName,
}

impl<S, C, D> Pipeline<S, C, D>
where
    S: MetadataSource,
    C: HttpClient + 'static,
    D: DocumentStore,
{
    /// Validates the configuration, builds one rate gate lane and circuit per
    /// source, removes staging leftovers and seeds the quota with what is
    /// already on disk.
    pub fn new(
        config: IngestConfig,
        query: Query,
        source: Arc<S>,
        file_client: Arc<C>,
        store: Arc<D>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let meta_source = source.name().clone();
        let file_source = source.file_source().clone();

        let mut gate = RateGate::builder().source(meta_source.clone(), config.rate_interval(&meta_source));
        let mut breaker = CircuitBreaker::new(CircuitConfig::default())
            .with_source(meta_source.clone(), config.circuit_config(&meta_source));
        if file_source != meta_source {
            gate = gate.source(file_source.clone(), config.rate_interval(&file_source));
            breaker = breaker.with_source(file_source.clone(), config.circuit_config(&file_source));
        }
        let gate = Arc::new(gate.build()?);
        let breaker = Arc::new(breaker);

        let staging = config.storage.staging_dir();
        sweep_staging(&staging)?;
        let used = disk_usage(&config.storage.base_path, &[staging.as_path()])?;
        let quota = Arc::new(StorageQuota::with_used(config.storage.max_bytes, used));
        tracing::info!(
            used_bytes = used,
            limit_bytes = config.storage.max_bytes,
            "storage quota seeded"
        );

        let downloads = Arc::new(DownloadManager::new(
            file_client,
            Arc::clone(&gate),
            Arc::clone(&breaker),
            Arc::clone(&quota),
            config.download_options(),
        ));
        let discovery = Discovery::new(source, gate, Arc::clone(&breaker), config.retry_policy())
            .request_timeout(config.request_timeout())
            .max_circuit_waits(config.pipeline.max_circuit_waits);
        let checkpoints =
            CheckpointStore::new(&config.checkpoint.dir).with_fingerprint(query.fingerprint());

        Ok(Self {
            config,
            query,
            discovery,
            downloads,
            store,
            checkpoints,
            breaker,
            quota,
            file_source,
        })
    }

    pub fn quota(&self) -> &Arc<StorageQuota> { &self.quota }

    pub fn checkpoints(&self) -> &CheckpointStore { &self.checkpoints }

    /// Runs until results are exhausted, the cap is reached, discovery fails,
    /// or `cancel` flips to `true`. On cancellation no new page is requested
    /// and no new download starts; in-flight downloads finish and the
    /// checkpoint is flushed before returning.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> Result<RunSummary, PipelineError> {
        let source = self.discovery.source().name().clone();
        let start = self
            .checkpoints
            .load(&source)?
            .map_or(0, |checkpoint| checkpoint.cursor.offset);
        tracing::info!(
            source = %source,
            start,
            max_results = self.query.max_results,
            "starting run"
        );

        let (queue_tx, queue_rx) = mpsc::channel(self.config.pipeline.queue_capacity);
        let (halt_tx, halt_rx) = watch::channel(false);

        let (produced, consumed) = tokio::join!(
            self.produce(start, queue_tx, cancel.clone(), halt_rx),
            self.consume(start, queue_rx, cancel, halt_tx),
        );
        let consumed = consumed?;
        let (produced, mut stop_reason) = produced?;
        if consumed.halted {
            stop_reason = StopReason::AllSourcesUnavailable;
        }

        let summary = RunSummary {
            discovered: produced.discovered,
            normalized: produced.normalized,
            rejected: produced.rejected,
            duplicates: produced.duplicates,
            new_records: produced.new_records,
            metadata_only: produced.metadata_only,
            downloads_succeeded: consumed.succeeded,
            downloads_failed: consumed.failed,
            skipped_quota: consumed.skipped,
            bytes_downloaded: consumed.bytes,
            checkpoint: Cursor::new(consumed.cursor),
            stop_reason,
            quota: self.quota.snapshot(),
        };
        tracing::info!(
            discovered = summary.discovered,
            rejected = summary.rejected,
            succeeded = summary.downloads_succeeded,
            failed = summary.downloads_failed,
            skipped_quota = summary.skipped_quota,
            cursor = summary.checkpoint.offset,
            stop = %summary.stop_reason,
            "run finished"
        );
        Ok(summary)
    }

    async fn produce(
        &self,
        start: usize,
        queue: mpsc::Sender<Item>,
        mut cancel: watch::Receiver<bool>,
        mut halt: watch::Receiver<bool>,
    ) -> Result<(Produced, StopReason), PipelineError> {
        let mut out = Produced::default();
        let mut dedup = Deduplicator::new();
        let mut pages = self.discovery.pages(&self.query, start);

        let stop = 'run: loop {
            let next = tokio::select! {
                biased;
                _ = signalled(&mut cancel) => break 'run StopReason::Cancelled,
                _ = signalled(&mut halt) => break 'run StopReason::AllSourcesUnavailable,
                next = pages.next_page() => next,
            };

            let DiscoveredPage { offset, records } = match next {
                Ok(Some(page)) => page,
                Ok(None) => match pages.end() {
                    Some(PageEnd::CapReached) => break StopReason::ResultCapReached,
                    _ => break StopReason::Exhausted,
                },
                Err(e) => break self.discovery_stop(e),
            };

            for (i, raw) in records.into_iter().enumerate() {
                out.discovered += 1;
                let item = self.admit(offset + i, raw, &mut dedup, &mut out)?;
                tokio::select! {
                    biased;
                    _ = signalled(&mut cancel) => break 'run StopReason::Cancelled,
                    _ = signalled(&mut halt) => break 'run StopReason::AllSourcesUnavailable,
                    sent = queue.send(item) => {
                        if sent.is_err() {
                            // consumer stopped on a fatal error; it reports why
                            break 'run StopReason::Cancelled;
                        }
                    }
                }
            }
        };

        tracing::debug!(discovered = out.discovered, stop = %stop, "discovery finished");
        Ok((out, stop))
    }

    fn discovery_stop(&self, error: DiscoveryError) -> StopReason {
        match error {
            DiscoveryError::CircuitOpen { error, .. } => {
                if self.breaker.is_open(&self.file_source) {
                    tracing::error!("metadata and file sources are both unavailable");
                    StopReason::AllSourcesUnavailable
                } else {
                    tracing::error!(source = %error.source_name, "metadata source unavailable");
                    StopReason::SourceUnavailable {
                        source: error.source_name,
                    }
                }
            }
            e => {
                tracing::error!(error = %e, "discovery failed");
                StopReason::DiscoveryFailed {
                    offset: e.offset().unwrap_or_default(),
                    error:  e.to_string(),
                }
            }
        }
    }

    /// Normalizes, deduplicates and persists one raw record, yielding what
    /// the consumer has to do with its position.
    fn admit(
        &self,
        position: usize,
        raw: RawRecord,
        dedup: &mut Deduplicator,
        out: &mut Produced,
    ) -> Result<Item, PipelineError> {
        let record = match normalize(&raw) {
            Ok(record) => record,
            Err(rejection) => {
                out.rejected += 1;
                tracing::warn!(position, %rejection, "record rejected");
                return Ok(Item::Settled { position });
            }
        };
        out.normalized += 1;

        let key = record.key();
        if !dedup.first_seen(&key) {
            out.duplicates += 1;
            tracing::debug!(%key, position, "duplicate record");
            return Ok(Item::Settled { position });
        }

        if self.store.upsert_record(&record)? == UpsertOutcome::Inserted {
            out.new_records += 1;
        }

        let Some(url) = record.file_url.clone() else {
            out.metadata_only += 1;
            return Ok(Item::Settled { position });
        };
        let target = target_path(
            &self.config.storage.base_path,
            &record.source_name,
            record.storage_category(),
            record.published_at,
            &record.source_id,
            self.downloads.options().integrity.kind.extension(),
        );
        Ok(Item::Download {
            position,
            task: DownloadTask::new(key, self.file_source.clone(), url, target),
        })
    }

    async fn consume(
        &self,
        start: usize,
        mut queue: mpsc::Receiver<Item>,
        mut cancel: watch::Receiver<bool>,
        halt: watch::Sender<bool>,
    ) -> Result<Consumed, PipelineError> {
        let source = self.discovery.source().name().clone();
        let limit = self.config.download.max_concurrent.max(1);
        let batch = self.config.checkpoint.batch_size.max(1);

        let mut out = Consumed {
            cursor: start,
            ..Consumed::default()
        };
        let mut tracker = CommitTracker::new(start);
        let mut inflight = JoinSet::new();
        let mut intake_open = true;

        loop {
            let can_take = intake_open && inflight.len() < limit;
            if !intake_open && inflight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = signalled(&mut cancel), if intake_open => {
                    tracing::info!(in_flight = inflight.len(), "cancellation requested, draining downloads");
                    intake_open = false;
                }
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    let (position, task, report) = match joined {
                        Ok(done) => done,
                        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                        Err(e) => {
                            tracing::error!(error = %e, "download task cancelled");
                            continue;
                        }
                    };
                    self.settle(&task, &report, &mut out)?;

                    if report.source_unavailable() && self.breaker.is_open(&source) && intake_open {
                        tracing::error!("metadata and file sources are both unavailable");
                        out.halted = true;
                        intake_open = false;
                        halt.send_replace(true);
                    }
                    self.commit(&source, &mut tracker, position, &mut out, batch)?;
                }
                item = queue.recv(), if can_take => match item {
                    Some(Item::Settled { position }) => {
                        self.commit(&source, &mut tracker, position, &mut out, batch)?;
                    }
                    Some(Item::Download { position, mut task }) => {
                        let downloads = Arc::clone(&self.downloads);
                        inflight.spawn(async move {
                            let report = downloads.run(&mut task).await;
                            (position, task, report)
                        });
                    }
                    None => intake_open = false,
                },
            }
        }

        // flush whatever the last partial batch committed
        let watermark = tracker.watermark();
        if watermark > out.cursor {
            self.checkpoints
                .advance(&source, Cursor::new(watermark), (watermark - out.cursor) as u64)?;
            out.cursor = watermark;
        }
        if tracker.pending() > 0 {
            tracing::info!(held = tracker.pending(), "items past the checkpoint will be revisited on resume");
        }
        Ok(out)
    }

    /// Persists a download outcome on its record and counts it.
    fn settle(
        &self,
        task: &DownloadTask,
        report: &DownloadReport,
        out: &mut Consumed,
    ) -> Result<(), PipelineError> {
        self.store
            .update_download_status(&task.key, DownloadState::from_report(report, &task.target_path))?;
        match report.status {
            DownloadStatus::Succeeded => {
                out.succeeded += 1;
                // zero-request successes found the file already in place
                if report.requests > 0 {
                    out.bytes += report.byte_size.unwrap_or(0);
                }
            }
            DownloadStatus::SkippedQuota => out.skipped += 1,
            _ => out.failed += 1,
        }
        Ok(())
    }

    /// Marks `position` terminal and writes a checkpoint once a full batch
    /// of contiguous items is committed.
    fn commit(
        &self,
        source: &SourceName,
        tracker: &mut CommitTracker,
        position: usize,
        out: &mut Consumed,
        batch: usize,
    ) -> Result<(), PipelineError> {
        let watermark = tracker.complete(position);
        if watermark - out.cursor >= batch {
            self.checkpoints
                .advance(source, Cursor::new(watermark), (watermark - out.cursor) as u64)?;
            out.cursor = watermark;
        }
        Ok(())
    }
}
