//! Pluggable upstream metadata sources.

mod arxiv;

use std::collections::BTreeSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use folio_fetch::{FetchError, SourceName};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::record::RawRecord;

pub use arxiv::{ARXIV_API_URL, ArxivSource, MAX_PAGE_SIZE, build_search_query, parse_feed};

/// What to discover. `max_results` caps items counted from the start of the
/// result list, not per run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub categories:  BTreeSet<String>,
    pub keywords:    BTreeSet<String>,
    pub date_from:   Option<DateTime<Utc>>,
    pub date_to:     Option<DateTime<Utc>>,
    pub max_results: usize,
}

impl Query {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories:  categories.into_iter().map(Into::into).collect(),
            keywords:    BTreeSet::new(),
            date_from:   None,
            date_to:     None,
            max_results: 100,
        }
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Stable hex digest identifying this query; stored with checkpoints so a
    /// cursor is only ever resumed against the query that produced it.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        // BTreeSet keeps the encoding order-independent of construction
        if let Ok(encoded) = serde_json::to_vec(self) {
            hasher.update(&encoded);
        }
        hex::encode(hasher.finalize())
    }
}

/// One page of raw records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub records:       Vec<RawRecord>,
    /// Total result count when the upstream declares one.
    pub total_results: Option<usize>,
}

/// An upstream catalog that can be paged by offset.
///
/// Implementations issue exactly one upstream request per call and do no
/// pacing or retrying of their own.
pub trait MetadataSource: Send + Sync {
    /// Key for the rate gate, circuit breaker and storage layout.
    fn name(&self) -> &SourceName;

    /// Upstream that serves the files this source links to.
    fn file_source(&self) -> &SourceName;

    /// Largest page the upstream accepts.
    fn max_page_size(&self) -> usize;

    fn fetch_page(
        &self,
        query: &Query,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Page, FetchError>> + Send;
}
