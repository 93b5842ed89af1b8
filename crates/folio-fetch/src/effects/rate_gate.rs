//! Minimum inter-request interval per upstream source.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

use crate::data::SourceName;
use crate::error::RateGateError;

/// arXiv API terms of use: one request every three seconds.
pub const ARXIV_API_FLOOR: Duration = Duration::from_secs(3);
/// arXiv file host.
pub const ARXIV_FILE_FLOOR: Duration = Duration::from_secs(1);
/// Any source without a named floor.
pub const DEFAULT_FLOOR: Duration = Duration::from_secs(1);

/// The smallest interval a source may be configured with.
pub fn floor_for(source: &SourceName) -> Duration {
    match source.as_str() {
        "arxiv" => ARXIV_API_FLOOR,
        "arxiv-pdf" => ARXIV_FILE_FLOOR,
        _ => DEFAULT_FLOOR,
    }
}

struct Lane {
    interval: Duration,
    // tokio's Mutex queues waiters in arrival order, which gives FIFO
    // fairness across callers of the same source.
    last:     Mutex<Option<Instant>>,
}

/// Serializes requests per source so that consecutive grants are at least
/// the source's interval apart.
///
/// One gate is shared by every caller that talks to a source; intervals are
/// fixed at construction.
pub struct RateGate {
    lanes: HashMap<SourceName, Lane>,
}

impl RateGate {
    pub fn builder() -> RateGateBuilder { RateGateBuilder::default() }

    /// Waits until the source's interval has elapsed since the previous grant.
    pub async fn acquire(&self, source: &SourceName) -> Result<(), RateGateError> {
        let lane = self
            .lanes
            .get(source)
            .ok_or_else(|| RateGateError::UnknownSource(source.clone()))?;

        let mut last = lane.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + lane.interval;
            if ready_at > Instant::now() {
                tracing::trace!(source = %source, wait = ?(ready_at - Instant::now()), "rate gate wait");
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }

    pub fn interval(&self, source: &SourceName) -> Option<Duration> {
        self.lanes.get(source).map(|lane| lane.interval)
    }

    pub fn contains(&self, source: &SourceName) -> bool { self.lanes.contains_key(source) }
}

#[derive(Default)]
pub struct RateGateBuilder {
    intervals: Vec<(SourceName, Duration)>,
}

impl RateGateBuilder {
    pub fn source(mut self, source: impl Into<SourceName>, interval: Duration) -> Self {
        self.intervals.push((source.into(), interval));
        self
    }

    /// Registers a source at exactly its floor.
    pub fn source_at_floor(self, source: impl Into<SourceName>) -> Self {
        let source = source.into();
        let floor = floor_for(&source);
        self.source(source, floor)
    }

    /// Fails if any interval is below its source's floor. Nothing is clamped.
    pub fn build(self) -> Result<RateGate, RateGateError> {
        let mut lanes = HashMap::with_capacity(self.intervals.len());
        for (source, interval) in self.intervals {
            let floor = floor_for(&source);
            if interval < floor {
                return Err(RateGateError::BelowFloor {
                    source_name: source,
                    requested: interval,
                    floor,
                });
            }
            lanes.insert(
                source,
                Lane {
                    interval,
                    last: Mutex::new(None),
                },
            );
        }
        Ok(RateGate { lanes })
    }
}
