#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use folio_fetch::{FetchError, HttpClient, HttpResponse, SourceName};
use folio_ingest::{
    IngestConfig, MemoryStore, MetadataSource, Page, Pipeline, Query, RawRecord, RunSummary,
};
use tokio::sync::watch;

pub const META_SOURCE: &str = "stub-meta";
pub const FILE_SOURCE: &str = "stub-files";

pub fn pdf_body(len: usize) -> Vec<u8> {
    let mut body = b"%PDF-1.7\n".to_vec();
    body.resize(len.max(body.len()), b'x');
    body
}

pub fn url(id: &str) -> String { format!("https://files.test/{id}.pdf") }

pub fn raw(id: &str) -> RawRecord {
    RawRecord {
        source_name:      META_SOURCE.into(),
        source_id:        Some(id.to_string()),
        title:            Some(format!("Paper {id}")),
        abstract_text:    Some("An abstract.".into()),
        authors:          vec!["Second Author".into(), "First Author".into()],
        categories:       vec!["cs.AI".into()],
        primary_category: Some("cs.AI".into()),
        published:        Some("2025-08-05T10:00:00Z".into()),
        updated:          None,
        file_url:         Some(url(id)),
    }
}

pub fn records(n: usize) -> Vec<RawRecord> { (0..n).map(|i| raw(&format!("2508.{i:05}v1"))).collect() }

/// Serves a fixed record list in pages and logs every requested offset.
pub struct StubSource {
    name:         SourceName,
    files:        SourceName,
    records:      Vec<RawRecord>,
    page_size:    usize,
    fail_at:      Option<usize>,
    timeout_from: Option<usize>,
    always_fail:  bool,
    cancel_after: Mutex<Option<(usize, watch::Sender<bool>)>>,
    calls:        Mutex<Vec<usize>>,
}

impl StubSource {
    pub fn new(records: Vec<RawRecord>, page_size: usize) -> Self {
        Self {
            name: META_SOURCE.into(),
            files: FILE_SOURCE.into(),
            records,
            page_size,
            fail_at: None,
            timeout_from: None,
            always_fail: false,
            cancel_after: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The page starting at `offset` fails with a malformed response.
    pub fn fail_at(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Pages at or after `offset` time out.
    pub fn time_out_from(mut self, offset: usize) -> Self {
        self.timeout_from = Some(offset);
        self
    }

    /// Every request times out.
    pub fn unreachable(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Signals `cancel` while serving request number `calls`.
    pub fn cancel_after(self, calls: usize, cancel: watch::Sender<bool>) -> Self {
        *self.cancel_after.lock().unwrap() = Some((calls, cancel));
        self
    }

    pub fn calls(&self) -> Vec<usize> { self.calls.lock().unwrap().clone() }
}

impl MetadataSource for StubSource {
    fn name(&self) -> &SourceName { &self.name }

    fn file_source(&self) -> &SourceName { &self.files }

    fn max_page_size(&self) -> usize { self.page_size }

    async fn fetch_page(&self, _: &Query, offset: usize, limit: usize) -> Result<Page, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(offset);
            calls.len()
        };
        if let Some((at, cancel)) = self.cancel_after.lock().unwrap().as_ref() {
            if *at == call {
                let _ = cancel.send(true);
            }
        }
        if self.always_fail || self.timeout_from.is_some_and(|from| offset >= from) {
            return Err(FetchError::Timeout);
        }
        if self.fail_at == Some(offset) {
            return Err(FetchError::Malformed("truncated feed".into()));
        }

        let end = self.records.len().min(offset + limit);
        Ok(Page {
            records:       self.records.get(offset..end).map(<[_]>::to_vec).unwrap_or_default(),
            total_results: Some(self.records.len()),
        })
    }
}

/// File host: a small PDF for every URL unless a status is scripted for it.
#[derive(Default)]
pub struct StubFiles {
    body_len: usize,
    statuses: HashMap<String, u16>,
    fallback: Option<u16>,
    latency:  Duration,
    requests: AtomicU32,
}

impl StubFiles {
    pub fn new(body_len: usize) -> Self {
        Self {
            body_len,
            ..Self::default()
        }
    }

    pub fn status(mut self, url: String, status: u16) -> Self {
        self.statuses.insert(url, status);
        self
    }

    /// Every unscripted URL answers with `status`.
    pub fn failing(mut self, status: u16) -> Self {
        self.fallback = Some(status);
        self
    }

    /// Each response arrives after `latency`.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> u32 { self.requests.load(Ordering::SeqCst) }
}

impl HttpClient for StubFiles {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.statuses.get(url).or(self.fallback.as_ref()) {
            Some(status) => Ok(HttpResponse::from_bytes(*status, Vec::new())),
            None => Ok(HttpResponse::from_bytes(200, pdf_body(self.body_len))),
        }
    }
}

pub fn config(dir: &Path) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.storage.base_path = dir.join("papers");
    config.storage.records_dir = dir.join("records");
    config.checkpoint.dir = dir.join("checkpoints");
    config.download.retry_base_ms = 10;
    config.download.retry_max_ms = 100;
    config.download.jitter_percent = 0;
    config.download.max_retries = 2;
    config
}

/// `{categories: {"cs.AI"}, max_results: 5, last two days}`.
pub fn query() -> Query {
    Query::new(["cs.AI"]).max_results(5).between(
        Utc.with_ymd_and_hms(2025, 8, 4, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 8, 6, 23, 59, 59).unwrap(),
    )
}

pub type StubPipeline = Pipeline<StubSource, StubFiles, MemoryStore>;

pub fn pipeline(
    config: IngestConfig,
    source: &Arc<StubSource>,
    files: &Arc<StubFiles>,
    store: &Arc<MemoryStore>,
) -> StubPipeline {
    Pipeline::new(
        config,
        query(),
        Arc::clone(source),
        Arc::clone(files),
        Arc::clone(store),
    )
    .unwrap()
}

pub async fn run(pipeline: &StubPipeline) -> RunSummary {
    let (_cancel, rx) = watch::channel(false);
    pipeline.run(rx).await.unwrap()
}

/// Regular files under `root`, staging included.
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}
