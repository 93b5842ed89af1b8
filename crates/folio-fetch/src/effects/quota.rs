//! Storage quota shared by concurrent downloaders.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::QuotaExceeded;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    pub used_bytes:  u64,
    pub limit_bytes: u64,
}

impl QuotaState {
    fn available(&self) -> u64 { self.limit_bytes.saturating_sub(self.used_bytes) }

    fn exceeded(&self, requested: u64) -> QuotaExceeded {
        QuotaExceeded {
            requested,
            available: self.available(),
            limit: self.limit_bytes,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub used_bytes:      u64,
    pub limit_bytes:     u64,
    pub available_bytes: u64,
    pub usage_percent:   f64,
}

/// Running total of bytes held by downloaded files against a hard ceiling.
///
/// Every check-then-increment happens under one lock, so concurrent callers
/// can never jointly overshoot the limit.
#[derive(Debug)]
pub struct StorageQuota {
    state: Mutex<QuotaState>,
}

impl StorageQuota {
    pub fn new(limit_bytes: u64) -> Self { Self::with_used(limit_bytes, 0) }

    /// Starts from bytes already on disk.
    pub fn with_used(limit_bytes: u64, used_bytes: u64) -> Self {
        if used_bytes > limit_bytes {
            tracing::warn!(used_bytes, limit_bytes, "existing storage already exceeds quota");
        }
        Self {
            state: Mutex::new(QuotaState {
                used_bytes,
                limit_bytes,
            }),
        }
    }

    /// Atomically claims `estimated_bytes` or rejects without side effects.
    pub fn reserve(self: &Arc<Self>, estimated_bytes: u64) -> Result<Reservation, QuotaExceeded> {
        let mut state = self.state.lock();
        if estimated_bytes > state.available() {
            return Err(state.exceeded(estimated_bytes));
        }
        state.used_bytes += estimated_bytes;
        drop(state);

        Ok(Reservation {
            quota:   Arc::clone(self),
            bytes:   estimated_bytes,
            settled: false,
        })
    }

    /// Returns bytes of a committed file that has since been removed.
    pub fn free(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.used_bytes = state.used_bytes.saturating_sub(bytes);
    }

    pub fn state(&self) -> QuotaState { *self.state.lock() }

    pub fn used_bytes(&self) -> u64 { self.state.lock().used_bytes }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let state = self.state();
        let usage_percent = if state.limit_bytes == 0 {
            100.0
        } else {
            state.used_bytes as f64 / state.limit_bytes as f64 * 100.0
        };
        QuotaSnapshot {
            used_bytes: state.used_bytes,
            limit_bytes: state.limit_bytes,
            available_bytes: state.available(),
            usage_percent,
        }
    }

    fn grow(&self, extra: u64) -> Result<(), QuotaExceeded> {
        let mut state = self.state.lock();
        if extra > state.available() {
            return Err(state.exceeded(extra));
        }
        state.used_bytes += extra;
        Ok(())
    }
}

/// Bytes held against the quota. Dropped or released reservations return
/// their bytes to the pool.
#[derive(Debug)]
#[must_use = "a reservation is released as soon as it is dropped"]
pub struct Reservation {
    quota:   Arc<StorageQuota>,
    bytes:   u64,
    settled: bool,
}

impl Reservation {
    pub fn bytes(&self) -> u64 { self.bytes }

    /// Extends the reservation, e.g. when a body outgrows its estimate.
    pub fn grow(&mut self, extra: u64) -> Result<(), QuotaExceeded> {
        self.quota.grow(extra)?;
        self.bytes += extra;
        Ok(())
    }

    /// Reconciles the estimate with the real size. On success the bytes stay
    /// counted as used; if the real size does not fit, the whole reservation
    /// is returned and the error reported.
    pub fn commit(mut self, actual_bytes: u64) -> Result<u64, QuotaExceeded> {
        self.settled = true;
        let mut state = self.quota.state.lock();
        if actual_bytes <= self.bytes {
            state.used_bytes = state.used_bytes.saturating_sub(self.bytes - actual_bytes);
            return Ok(actual_bytes);
        }

        let extra = actual_bytes - self.bytes;
        if extra > state.available() {
            let err = state.exceeded(extra);
            state.used_bytes = state.used_bytes.saturating_sub(self.bytes);
            return Err(err);
        }
        state.used_bytes += extra;
        Ok(actual_bytes)
    }

    pub fn release(self) {}
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.quota.free(self.bytes);
        }
    }
}
