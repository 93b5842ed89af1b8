#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use folio_fetch::{
    CircuitBreaker, CircuitConfig, DownloadManager, DownloadOptions, DownloadTask, FetchError,
    HttpClient, HttpResponse, RateGate, RecordKey, RetryPolicy, SourceName, StorageQuota,
};
use futures_util::stream;

pub const FILE_SOURCE: &str = "stub-files";

/// A minimal body that passes the PDF signature check.
pub fn pdf_body(len: usize) -> Vec<u8> {
    let mut body = b"%PDF-1.7\n".to_vec();
    body.resize(len.max(body.len()), b'x');
    body
}

#[derive(Clone)]
pub enum Reply {
    Ok(Vec<u8>),
    /// Body without a `Content-Length`.
    Chunked(Vec<u8>),
    /// Declares more bytes than it sends.
    Short { declared: u64, body: Vec<u8> },
    Status(u16),
    Timeout,
}

/// Scripted client. Each URL replays its replies in order; the last reply
/// repeats. Counts every request.
#[derive(Default)]
pub struct StubClient {
    routes:   Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: AtomicU32,
}

impl StubClient {
    pub fn new() -> Self { Self::default() }

    pub fn route(self, url: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into_iter().collect());
        self
    }

    pub fn requests(&self) -> u32 { self.requests.load(Ordering::SeqCst) }

    fn next_reply(&self, url: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(url) else {
            return Reply::Status(404);
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or(Reply::Status(404))
        }
    }
}

impl HttpClient for StubClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.next_reply(url) {
            Reply::Ok(body) => Ok(HttpResponse::from_bytes(200, body)),
            Reply::Chunked(body) => {
                let chunks: Vec<Result<Bytes, FetchError>> = body
                    .chunks(64)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(HttpResponse {
                    status:         200,
                    content_length: None,
                    body:           Box::pin(stream::iter(chunks)),
                })
            }
            Reply::Short { declared, body } => {
                let mut response = HttpResponse::from_bytes(200, body);
                response.content_length = Some(declared);
                Ok(response)
            }
            Reply::Status(status) => Ok(HttpResponse::from_bytes(status, Vec::new())),
            Reply::Timeout => Err(FetchError::Timeout),
        }
    }
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: std::time::Duration::from_millis(10),
        max_delay: std::time::Duration::from_millis(100),
        jitter_percent: 0,
    }
}

pub fn options(dir: &Path) -> DownloadOptions {
    DownloadOptions::default()
        .staging_dir(dir.join(".staging"))
        .concurrency(2)
        .retry(fast_retry(2))
}

pub fn manager(
    client: Arc<StubClient>,
    limit: u64,
    breaker: CircuitConfig,
    options: DownloadOptions,
) -> DownloadManager<StubClient> {
    let gate = RateGate::builder().source_at_floor(FILE_SOURCE).build().unwrap();
    DownloadManager::new(
        client,
        Arc::new(gate),
        Arc::new(CircuitBreaker::new(breaker)),
        Arc::new(StorageQuota::new(limit)),
        options,
    )
}

pub fn task(dir: &Path, id: &str) -> DownloadTask {
    DownloadTask::new(
        RecordKey::new("arxiv", id),
        SourceName::new(FILE_SOURCE),
        format!("https://files.test/{id}.pdf"),
        dir.join(format!("arxiv/cs.AI/2025/08/{id}.pdf")),
    )
}

pub fn url(id: &str) -> String { format!("https://files.test/{id}.pdf") }

pub fn staging_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir.join(".staging")) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}
