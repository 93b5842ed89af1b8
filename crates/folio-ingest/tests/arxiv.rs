mod support;

use std::sync::{Arc, Mutex};

use folio_fetch::{DownloadStatus, FetchError, HttpClient, HttpResponse, RecordKey};
use folio_ingest::{ArxivSource, DocumentStore, MemoryStore, MetadataSource, Pipeline, StopReason};
use support::*;
use tokio::sync::watch;

const FEED: &str = include_str!("fixtures/arxiv_page.xml");

/// Answers every request with one status and body, remembering the URLs.
struct FeedClient {
    status: u16,
    body:   &'static str,
    urls:   Mutex<Vec<String>>,
}

impl FeedClient {
    fn new(status: u16, body: &'static str) -> Self {
        Self {
            status,
            body,
            urls: Mutex::new(Vec::new()),
        }
    }

    fn urls(&self) -> Vec<String> { self.urls.lock().unwrap().clone() }
}

impl HttpClient for FeedClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(HttpResponse::from_bytes(self.status, self.body.as_bytes().to_vec()))
    }
}

#[tokio::test]
async fn test_error_status_surfaces_as_fetch_error() {
    let client = Arc::new(FeedClient::new(400, "bad query"));
    let source = ArxivSource::new(Arc::clone(&client)).base_url("https://api.test/query");

    let result = source.fetch_page(&query(), 0, 10).await;
    assert!(matches!(result, Err(FetchError::Status { status: 400, .. })));
    assert!(client.urls()[0].starts_with("https://api.test/query?"));
}

#[tokio::test(start_paused = true)]
async fn test_feed_flows_through_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let feed = Arc::new(FeedClient::new(200, FEED));
    let source = Arc::new(ArxivSource::new(Arc::clone(&feed)).base_url("https://api.test/query"));
    let files = Arc::new(StubFiles::new(4096));
    let store = Arc::new(MemoryStore::new());

    let pipeline = Pipeline::new(config, query(), source, Arc::clone(&files), Arc::clone(&store)).unwrap();
    let (_cancel, rx) = watch::channel(false);
    let summary = pipeline.run(rx).await.unwrap();

    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.normalized, 2);
    // the old-style entry carries no PDF link
    assert_eq!(summary.metadata_only, 1);
    assert_eq!(summary.downloads_succeeded, 1);
    assert_eq!(files.requests(), 1);

    let urls = feed.urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].contains("start=0"));
    assert!(urls[0].contains("max_results=5"));
    assert!(urls[0].contains("sortBy=submittedDate"));

    let modern = store
        .get(&RecordKey::new("arxiv", "2508.04663v1".to_string()))
        .unwrap()
        .unwrap();
    assert_eq!(modern.record.primary_category.as_deref(), Some("cs.AI"));
    assert_eq!(modern.record.authors.len(), 3);
    assert_eq!(modern.download_status.unwrap().status, DownloadStatus::Succeeded);
}
