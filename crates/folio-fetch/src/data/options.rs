use std::path::PathBuf;
use std::time::Duration;

use folio_verify::{FileKind, IntegrityPolicy};

/// Exponential backoff parameters for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries:    u32,
    pub base_delay:     Duration,
    pub max_delay:      Duration,
    /// Upper bound of random extra delay, as a percentage of the capped delay.
    pub jitter_percent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries:    3,
            base_delay:     Duration::from_secs(1),
            max_delay:      Duration::from_secs(60),
            jitter_percent: 10,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 { self.max_retries.saturating_add(1) }
}

/// Per-source circuit breaker tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cooldown:          Duration,
    /// Ceiling for cooldown growth after failed probes.
    pub max_cooldown:      Duration,
    pub backoff_factor:    f64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown:          Duration::from_secs(60),
            max_cooldown:      Duration::from_secs(600),
            backoff_factor:    2.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DownloadOptions {
    /// Maximum simultaneous in-flight downloads.
    pub concurrency:            usize,
    /// Reservation size when the response carries no `Content-Length`.
    pub default_estimate_bytes: u64,
    pub integrity:              IntegrityPolicy,
    pub staging_dir:            PathBuf,
    pub request_timeout:        Duration,
    pub retry:                  RetryPolicy,
    /// How many times a download waits out an open circuit before giving up.
    pub max_circuit_waits:      u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency:            5,
            default_estimate_bytes: 10 * 1024 * 1024,
            integrity:              IntegrityPolicy::new(FileKind::Pdf),
            staging_dir:            PathBuf::from(".staging"),
            request_timeout:        Duration::from_secs(30),
            retry:                  RetryPolicy::default(),
            max_circuit_waits:      3,
        }
    }
}

impl DownloadOptions {
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
