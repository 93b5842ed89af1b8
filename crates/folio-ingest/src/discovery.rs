//! Sequential, restartable paging over a [`MetadataSource`].
//!
//! Every page request passes the source's circuit breaker, then its rate
//! gate, then runs under a timeout. Transient failures retry the same offset
//! with backoff; a page that cannot be fetched is reported with its offset so
//! the caller can resume before it.

use std::sync::Arc;
use std::time::Duration;

use folio_fetch::{
    CircuitBreaker, CircuitOpenError, FetchError, RateGate, RateGateError, RetryDecision,
    RetryPolicy, RetryState,
};
use thiserror::Error;
use tokio::time::{sleep, timeout};

use crate::record::RawRecord;
use crate::source::{MetadataSource, Query};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("page at offset {offset} failed after {attempts} attempts: {source}")]
    Failed {
        offset:   usize,
        attempts: u32,
        source:   FetchError,
    },

    #[error("page at offset {offset} failed permanently: {source}")]
    Permanent { offset: usize, source: FetchError },

    #[error("page at offset {offset} not requested: {error}")]
    CircuitOpen {
        offset: usize,
        error:  CircuitOpenError,
    },

    #[error(transparent)]
    RateGate(#[from] RateGateError),
}

impl DiscoveryError {
    /// Offset of the page that was not delivered.
    pub fn offset(&self) -> Option<usize> {
        match self {
            DiscoveryError::Failed { offset, .. }
            | DiscoveryError::Permanent { offset, .. }
            | DiscoveryError::CircuitOpen { offset, .. } => Some(*offset),
            DiscoveryError::RateGate(_) => None,
        }
    }
}

/// Why a page sequence stopped yielding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageEnd {
    /// The upstream has no more results.
    Exhausted,
    /// `max_results` items have been yielded, counted from the query start.
    CapReached,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredPage {
    /// Position of the first record in the query's result list.
    pub offset:  usize,
    pub records: Vec<RawRecord>,
}

pub struct Discovery<S> {
    source:            Arc<S>,
    gate:              Arc<RateGate>,
    breaker:           Arc<CircuitBreaker>,
    retry:             RetryPolicy,
    request_timeout:   Duration,
    max_circuit_waits: u32,
}

impl<S: MetadataSource> Discovery<S> {
    pub fn new(
        source: Arc<S>,
        gate: Arc<RateGate>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            gate,
            breaker,
            retry,
            request_timeout: Duration::from_secs(30),
            max_circuit_waits: 3,
        }
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn max_circuit_waits(mut self, waits: u32) -> Self {
        self.max_circuit_waits = waits;
        self
    }

    pub fn source(&self) -> &Arc<S> { &self.source }

    /// Pages of `query` starting at result position `start`.
    pub fn pages<'a>(&'a self, query: &'a Query, start: usize) -> Pages<'a, S> {
        Pages {
            discovery: self,
            query,
            offset: start,
            last_page: false,
            end: None,
        }
    }

    #[tracing::instrument(skip(self, query), fields(source = %self.source.name()))]
    async fn fetch(
        &self,
        query: &Query,
        offset: usize,
        limit: usize,
    ) -> Result<crate::source::Page, DiscoveryError> {
        let name = self.source.name();
        let mut retry = RetryState::new(self.retry);
        let mut circuit_waits = 0;

        loop {
            let permit = match self.breaker.check(name) {
                Ok(permit) => permit,
                Err(open) => {
                    if circuit_waits >= self.max_circuit_waits {
                        return Err(DiscoveryError::CircuitOpen {
                            offset,
                            error: open,
                        });
                    }
                    circuit_waits += 1;
                    tracing::info!(retry_after = ?open.retry_after, "metadata source circuit open, waiting");
                    sleep(open.retry_after).await;
                    continue;
                }
            };
            self.gate.acquire(name).await?;

            let result = timeout(self.request_timeout, self.source.fetch_page(query, offset, limit))
                .await
                .unwrap_or(Err(FetchError::Timeout));

            let error = match result {
                Ok(page) => {
                    permit.success();
                    return Ok(page);
                }
                Err(e) if e.is_transient() => {
                    permit.failure();
                    e
                }
                Err(e) => {
                    // the upstream answered; its health is not in question
                    permit.success();
                    return Err(DiscoveryError::Permanent { offset, source: e });
                }
            };

            match retry.on_failure() {
                RetryDecision::Retry { attempt, delay } => {
                    tracing::debug!(attempt, ?delay, error = %error, "transient page failure, retrying");
                    sleep(delay).await;
                }
                RetryDecision::Exhausted { attempts } => {
                    return Err(DiscoveryError::Failed {
                        offset,
                        attempts,
                        source: error,
                    });
                }
            }
        }
    }
}

/// Lazy page sequence. Offsets only ever increase; a failed page leaves the
/// offset where it was.
pub struct Pages<'a, S> {
    discovery: &'a Discovery<S>,
    query:     &'a Query,
    offset:    usize,
    last_page: bool,
    end:       Option<PageEnd>,
}

impl<S: MetadataSource> Pages<'_, S> {
    /// Next result position to request.
    pub fn offset(&self) -> usize { self.offset }

    /// Set once the sequence has finished.
    pub fn end(&self) -> Option<PageEnd> { self.end }

    pub async fn next_page(&mut self) -> Result<Option<DiscoveredPage>, DiscoveryError> {
        if self.end.is_some() {
            return Ok(None);
        }
        if self.last_page {
            self.end = Some(PageEnd::Exhausted);
            return Ok(None);
        }
        let cap = self.query.max_results;
        if self.offset >= cap {
            self.end = Some(PageEnd::CapReached);
            return Ok(None);
        }

        let limit = self
            .discovery
            .source
            .max_page_size()
            .max(1)
            .min(cap - self.offset);
        let page = self.discovery.fetch(self.query, self.offset, limit).await?;

        let mut records = page.records;
        if records.is_empty() {
            tracing::debug!(offset = self.offset, "empty page, results exhausted");
            self.end = Some(PageEnd::Exhausted);
            return Ok(None);
        }
        records.truncate(limit);

        let offset = self.offset;
        self.offset += records.len();
        if page.total_results.is_some_and(|total| self.offset >= total) {
            self.last_page = true;
        }
        tracing::debug!(offset, count = records.len(), total = ?page.total_results, "page discovered");
        Ok(Some(DiscoveredPage { offset, records }))
    }
}
