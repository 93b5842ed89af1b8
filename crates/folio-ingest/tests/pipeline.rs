mod support;

use std::sync::Arc;

use folio_fetch::{DownloadStatus, RecordKey};
use folio_ingest::config::SourceConfig;
use folio_ingest::{
    CheckpointError, CheckpointStore, Cursor, DocumentStore, FsStore, MemoryStore, Pipeline, PipelineError, StopReason,
};
use support::*;
use tokio::sync::watch;

fn key(id: &str) -> RecordKey { RecordKey::new(META_SOURCE, id.to_string()) }

fn pdfs(config: &folio_ingest::IngestConfig) -> Vec<std::path::PathBuf> {
    let staging = config.storage.staging_dir();
    files_under(&config.storage.base_path)
        .into_iter()
        .filter(|p| !p.starts_with(&staging))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_downloads_every_record_and_checkpoints_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let source = Arc::new(StubSource::new(records(5), 100));
    let files = Arc::new(StubFiles::new(2048));
    let store = Arc::new(MemoryStore::new());

    let pipeline = pipeline(config.clone(), &source, &files, &store);
    let summary = run(&pipeline).await;

    assert_eq!(summary.discovered, 5);
    assert_eq!(summary.normalized, 5);
    assert_eq!(summary.rejected, 0);
    assert_eq!(summary.new_records, 5);
    assert_eq!(summary.downloads_succeeded, 5);
    assert_eq!(summary.bytes_downloaded, 5 * 2048);
    assert_eq!(summary.checkpoint, Cursor::new(5));
    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(summary.quota.used_bytes, 5 * 2048);
    assert_eq!(source.calls(), vec![0]);
    assert_eq!(files.requests(), 5);

    let stored = store.records();
    assert_eq!(stored.len(), 5);
    for record in &stored {
        let state = record.download_status.as_ref().unwrap();
        assert_eq!(state.status, DownloadStatus::Succeeded);
        let path = state.file_path.as_ref().unwrap();
        assert_eq!(std::fs::read(path).unwrap().len(), 2048);
        assert!(path.starts_with(&config.storage.base_path));
    }
    assert_eq!(pdfs(&config).len(), 5);
    assert!(files_under(&config.storage.staging_dir()).is_empty());

    let checkpoint = pipeline.checkpoints().load(&META_SOURCE.into()).unwrap().unwrap();
    assert_eq!(checkpoint.cursor, Cursor::new(5));
    assert_eq!(checkpoint.items_committed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_quota_for_two_files_skips_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.storage.max_bytes = 2_500;
    let source = Arc::new(StubSource::new(records(5), 100));
    let files = Arc::new(StubFiles::new(1_000));
    let store = Arc::new(MemoryStore::new());

    let summary = run(&pipeline(config.clone(), &source, &files, &store)).await;

    assert_eq!(summary.downloads_succeeded, 2);
    assert_eq!(summary.skipped_quota, 3);
    assert_eq!(summary.downloads_failed, 0);
    assert_eq!(summary.quota.used_bytes, 2_000);
    // skipped items are terminal
    assert_eq!(summary.checkpoint, Cursor::new(5));

    assert_eq!(pdfs(&config).len(), 2);
    assert!(files_under(&config.storage.staging_dir()).is_empty());
    let skipped = store
        .records()
        .into_iter()
        .filter(|r| r.download_status.as_ref().unwrap().status == DownloadStatus::SkippedQuota)
        .count();
    assert_eq!(skipped, 3);
}

#[tokio::test(start_paused = true)]
async fn test_resume_neither_repeats_nor_skips() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.checkpoint.batch_size = 2;
    let store = Arc::new(MemoryStore::new());

    let broken = Arc::new(StubSource::new(records(5), 2).fail_at(4));
    let files = Arc::new(StubFiles::new(512));
    let first = run(&pipeline(config.clone(), &broken, &files, &store)).await;

    assert_eq!(first.discovered, 4);
    assert_eq!(first.checkpoint, Cursor::new(4));
    assert!(matches!(first.stop_reason, StopReason::DiscoveryFailed { offset: 4, .. }));
    assert_eq!(files.requests(), 4);

    let healthy = Arc::new(StubSource::new(records(5), 2));
    let files = Arc::new(StubFiles::new(512));
    let second = run(&pipeline(config.clone(), &healthy, &files, &store)).await;

    assert_eq!(healthy.calls(), vec![4]);
    assert_eq!(second.discovered, 1);
    assert_eq!(second.downloads_succeeded, 1);
    assert_eq!(files.requests(), 1);
    assert_eq!(second.checkpoint, Cursor::new(5));
    assert_eq!(second.stop_reason, StopReason::Exhausted);
    assert_eq!(store.len(), 5);
    assert_eq!(pdfs(&config).len(), 5);

    let checkpoint = CheckpointStore::new(&config.checkpoint.dir)
        .with_fingerprint(query().fingerprint())
        .load(&META_SOURCE.into())
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.items_committed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_does_no_io() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(StubSource::new(records(5), 100));
    let files = Arc::new(StubFiles::new(512));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(config(dir.path()), &source, &files, &store);

    let (cancel, rx) = watch::channel(false);
    cancel.send(true).unwrap();
    let summary = pipeline.run(rx).await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.checkpoint, Cursor::new(0));
    assert!(source.calls().is_empty());
    assert_eq!(files.requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_run_then_resume_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.checkpoint.batch_size = 1;
    let store = Arc::new(MemoryStore::new());

    let (cancel, rx) = watch::channel(false);
    let source = Arc::new(StubSource::new(records(5), 2).cancel_after(2, cancel));
    let files = Arc::new(StubFiles::new(512));
    let first = pipeline(config.clone(), &source, &files, &store).run(rx).await.unwrap();

    assert_eq!(first.stop_reason, StopReason::Cancelled);
    // no page requested after the signal
    assert_eq!(source.calls().len(), 2);
    assert!(first.checkpoint.offset <= 2);
    assert_eq!(first.downloads_failed, 0);
    assert!(files_under(&config.storage.staging_dir()).is_empty());

    let source = Arc::new(StubSource::new(records(5), 2));
    let second = run(&pipeline(config.clone(), &source, &files, &store)).await;

    assert_eq!(source.calls()[0], first.checkpoint.offset);
    assert_eq!(second.checkpoint, Cursor::new(5));
    assert_eq!(second.stop_reason, StopReason::Exhausted);
    assert_eq!(pdfs(&config).len(), 5);
    // a file finished before the cancel is found in place, not fetched again
    assert_eq!(files.requests(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_rejects_duplicates_and_metadata_only_are_settled() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let mut untitled = raw("b");
    untitled.title = None;
    let mut no_file = raw("c");
    no_file.file_url = None;
    let batch = vec![raw("a"), untitled, raw("a"), no_file, raw("d")];

    let source = Arc::new(StubSource::new(batch, 100));
    let files = Arc::new(StubFiles::new(512));
    let store = Arc::new(MemoryStore::new());
    let summary = run(&pipeline(config, &source, &files, &store)).await;

    assert_eq!(summary.discovered, 5);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.normalized, 4);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.new_records, 3);
    assert_eq!(summary.metadata_only, 1);
    assert_eq!(summary.downloads_succeeded, 2);
    assert_eq!(summary.checkpoint, Cursor::new(5));
    assert_eq!(files.requests(), 2);

    assert_eq!(store.len(), 3);
    assert!(!store.exists(&key("b")).unwrap());
    assert_eq!(store.get(&key("c")).unwrap().unwrap().download_status, None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_download_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let batch = records(5);
    let missing = batch[2].source_id.clone().unwrap();

    let source = Arc::new(StubSource::new(batch, 100));
    let files = Arc::new(StubFiles::new(512).status(url(&missing), 404));
    let store = Arc::new(MemoryStore::new());
    let summary = run(&pipeline(config.clone(), &source, &files, &store)).await;

    assert_eq!(summary.downloads_succeeded, 4);
    assert_eq!(summary.downloads_failed, 1);
    assert_eq!(summary.checkpoint, Cursor::new(5));
    assert_eq!(summary.stop_reason, StopReason::Exhausted);

    let state = store.get(&key(&missing)).unwrap().unwrap().download_status.unwrap();
    assert_eq!(state.status, DownloadStatus::Failed);
    assert!(state.reason.is_some());
    assert_eq!(state.file_path, None);
    assert_eq!(pdfs(&config).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_open_metadata_circuit_stops_with_source_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.pipeline.max_circuit_waits = 0;
    config.sources.insert(META_SOURCE.into(), SourceConfig {
        failure_threshold: Some(2),
        cooldown_secs: Some(600),
        ..SourceConfig::default()
    });

    let source = Arc::new(StubSource::new(records(5), 100).unreachable());
    let files = Arc::new(StubFiles::new(512));
    let store = Arc::new(MemoryStore::new());
    let summary = run(&pipeline(config, &source, &files, &store)).await;

    assert_eq!(summary.stop_reason, StopReason::SourceUnavailable {
        source: META_SOURCE.into(),
    });
    // two failures open the circuit; the third attempt never reaches the source
    assert_eq!(source.calls(), vec![0, 0]);
    assert_eq!(summary.checkpoint, Cursor::new(0));
}

#[tokio::test(start_paused = true)]
async fn test_file_circuit_opening_after_discovery_died_halts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.download.max_retries = 0;
    config.download.max_concurrent = 1;
    config.pipeline.max_circuit_waits = 0;
    for name in [META_SOURCE, FILE_SOURCE] {
        config.sources.insert(name.into(), SourceConfig {
            failure_threshold: Some(1),
            cooldown_secs: Some(600),
            ..SourceConfig::default()
        });
    }

    // the second page times out at t=1s; the first download answers 503 at t=2s
    let source = Arc::new(StubSource::new(records(5), 4).time_out_from(4));
    let files = Arc::new(
        StubFiles::new(512)
            .failing(503)
            .latency(std::time::Duration::from_secs(2)),
    );
    let store = Arc::new(MemoryStore::new());
    let summary = run(&pipeline(config, &source, &files, &store)).await;

    assert_eq!(summary.stop_reason, StopReason::AllSourcesUnavailable);
    assert_eq!(summary.discovered, 4);
    // the second download finds the file circuit open and the queue is dropped
    assert_eq!(files.requests(), 1);
    assert_eq!(summary.downloads_failed, 2);
    assert_eq!(summary.checkpoint, Cursor::new(2));
}

#[tokio::test(start_paused = true)]
async fn test_interval_below_floor_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.sources.insert(META_SOURCE.into(), SourceConfig {
        rate_interval_ms: Some(10),
        ..SourceConfig::default()
    });

    let result = Pipeline::new(
        config,
        query(),
        Arc::new(StubSource::new(records(1), 100)),
        Arc::new(StubFiles::new(512)),
        Arc::new(MemoryStore::new()),
    );
    assert!(matches!(result, Err(PipelineError::RateFloor(_))));
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_checkpoint_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    config.checkpoint.dir = blocker;

    let source = Arc::new(StubSource::new(records(3), 100));
    let files = Arc::new(StubFiles::new(512));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(config, &source, &files, &store);

    let (_cancel, rx) = watch::channel(false);
    let result = pipeline.run(rx).await;
    assert!(matches!(result, Err(PipelineError::Checkpoint(CheckpointError::Read(_)))));
}

#[tokio::test(start_paused = true)]
async fn test_leftover_files_count_against_the_quota() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.storage.max_bytes = 1_500;

    let staging = config.storage.staging_dir();
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("torn.part"), vec![0u8; 4096]).unwrap();
    std::fs::write(config.storage.base_path.join("older.pdf"), vec![0u8; 1_000]).unwrap();

    let source = Arc::new(StubSource::new(records(2), 100));
    let files = Arc::new(StubFiles::new(1_000));
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(config.clone(), &source, &files, &store);

    // staging is swept, the finished file is counted
    assert!(files_under(&staging).is_empty());
    assert_eq!(pipeline.quota().snapshot().used_bytes, 1_000);

    let summary = run(&pipeline).await;
    assert_eq!(summary.downloads_succeeded, 0);
    assert_eq!(summary.skipped_quota, 2);
}

#[tokio::test(start_paused = true)]
async fn test_records_persist_as_documents() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let source = Arc::new(StubSource::new(records(3), 100));
    let files = Arc::new(StubFiles::new(512));
    let store = Arc::new(FsStore::new(&config.storage.records_dir));

    let pipeline = Pipeline::new(config, query(), Arc::clone(&source), files, Arc::clone(&store)).unwrap();
    let (_cancel, rx) = watch::channel(false);
    let summary = pipeline.run(rx).await.unwrap();
    assert_eq!(summary.downloads_succeeded, 3);

    let id = records(3)[1].source_id.clone().unwrap();
    let path = store.document_path(&key(&id));
    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(doc["source_id"], id);
    assert_eq!(doc["download_status"]["status"], "succeeded");
    assert_eq!(doc["authors"][0], "Second Author");
}
