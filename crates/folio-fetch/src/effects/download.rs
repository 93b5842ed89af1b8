use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};

use folio_fs::StagedFile;
use folio_verify::{FileReport, Hasher, Sha256Hasher, inspect_file};

use crate::core::{RetryDecision, RetryState, StatusClass, classify_status};
use crate::data::{DownloadOptions, DownloadReport, DownloadStatus, DownloadTask, FailureReason};
use crate::effects::circuit::{CircuitBreaker, CircuitPermit};
use crate::effects::http::HttpClient;
use crate::effects::quota::StorageQuota;
use crate::effects::rate_gate::RateGate;
use crate::error::{FetchError, QuotaExceeded};

/// Bytes kept from the start of a body for the signature check.
const HEADER_PREFIX: usize = 16;

/// Fetches record files under bounded concurrency, a shared rate gate, a
/// shared circuit breaker and a shared storage quota.
pub struct DownloadManager<C> {
    client:  Arc<C>,
    gate:    Arc<RateGate>,
    breaker: Arc<CircuitBreaker>,
    quota:   Arc<StorageQuota>,
    options: DownloadOptions,
    permits: Semaphore,
}

struct Fetched {
    bytes:  u64,
    sha256: String,
}

enum AttemptError {
    Fetch(FetchError),
    Quota(QuotaExceeded),
}

impl From<FetchError> for AttemptError {
    fn from(e: FetchError) -> Self { AttemptError::Fetch(e) }
}

impl From<QuotaExceeded> for AttemptError {
    fn from(e: QuotaExceeded) -> Self { AttemptError::Quota(e) }
}

impl From<std::io::Error> for AttemptError {
    fn from(e: std::io::Error) -> Self { AttemptError::Fetch(e.into()) }
}

impl From<folio_fs::Error> for AttemptError {
    fn from(e: folio_fs::Error) -> Self { AttemptError::Fetch(e.into()) }
}

impl From<folio_verify::VerificationError> for AttemptError {
    fn from(e: folio_verify::VerificationError) -> Self { AttemptError::Fetch(e.into()) }
}

impl<C: HttpClient> DownloadManager<C> {
    pub fn new(
        client: Arc<C>,
        gate: Arc<RateGate>,
        breaker: Arc<CircuitBreaker>,
        quota: Arc<StorageQuota>,
        options: DownloadOptions,
    ) -> Self {
        let permits = Semaphore::new(options.concurrency.max(1));
        Self {
            client,
            gate,
            breaker,
            quota,
            options,
            permits,
        }
    }

    pub fn quota(&self) -> &Arc<StorageQuota> { &self.quota }

    pub fn options(&self) -> &DownloadOptions { &self.options }

    /// Drives `task` to a terminal status and reports how it got there.
    ///
    /// A valid file already at the target path completes the task without
    /// any network request.
    #[tracing::instrument(
        skip_all,
        fields(source = %task.key.source_name, source_id = %task.key.source_id)
    )]
    pub async fn run(&self, task: &mut DownloadTask) -> DownloadReport {
        let report = match self.permits.acquire().await {
            Ok(_permit) => {
                task.status = DownloadStatus::InProgress;
                self.run_inner(task).await
            }
            Err(e) => DownloadReport::failed(FailureReason::Storage(e.to_string()), 0),
        };

        task.status = report.status;
        task.byte_size = report.byte_size;
        match report.status {
            DownloadStatus::Succeeded => {
                tracing::debug!(bytes = report.byte_size, requests = report.requests, "download succeeded")
            }
            status => tracing::warn!(
                %status,
                reason = ?report.reason,
                "download did not succeed"
            ),
        }
        report
    }

    async fn run_inner(&self, task: &DownloadTask) -> DownloadReport {
        if let Some(existing) = self.existing_file(&task.target_path).await {
            tracing::debug!(path = %task.target_path.display(), "already downloaded");
            return DownloadReport::succeeded(existing.size, existing.sha256_hex(), 0);
        }

        let mut retry = RetryState::new(self.options.retry);
        let mut circuit_waits = 0;
        let mut requests = 0;

        loop {
            let permit = match self.breaker.check(&task.file_source) {
                Ok(permit) => permit,
                Err(open) => {
                    if circuit_waits >= self.options.max_circuit_waits {
                        return DownloadReport::failed(FailureReason::SourceUnavailable, requests);
                    }
                    circuit_waits += 1;
                    tracing::info!(retry_after = ?open.retry_after, "file source circuit open, waiting");
                    sleep(open.retry_after).await;
                    continue;
                }
            };
            if let Err(e) = self.gate.acquire(&task.file_source).await {
                return DownloadReport::failed(FailureReason::Permanent(e.to_string()), requests);
            }

            requests += 1;
            let error = match self.attempt(task, permit).await {
                Ok(fetched) => {
                    return DownloadReport::succeeded(fetched.bytes, fetched.sha256, requests);
                }
                Err(AttemptError::Quota(e)) => {
                    return DownloadReport::failed(FailureReason::Quota(e.to_string()), requests);
                }
                Err(AttemptError::Fetch(e)) => e,
            };

            if !error.is_transient() {
                let reason = match error {
                    e if e.is_not_found() => FailureReason::NotFound,
                    FetchError::Integrity(e) => FailureReason::Integrity(e.to_string()),
                    e if e.is_local() => FailureReason::Storage(e.to_string()),
                    e => FailureReason::Permanent(e.to_string()),
                };
                return DownloadReport::failed(reason, requests);
            }

            match retry.on_failure() {
                RetryDecision::Retry { attempt, delay } => {
                    tracing::debug!(attempt, ?delay, error = %error, "transient download failure, retrying");
                    sleep(delay).await;
                }
                RetryDecision::Exhausted { attempts } => {
                    return DownloadReport::failed(
                        FailureReason::RetriesExhausted {
                            attempts,
                            last_error: error.to_string(),
                        },
                        requests,
                    );
                }
            }
        }
    }

    /// One request. Quota is held only for the duration of the transfer, so
    /// nothing stays reserved across a retry backoff.
    async fn attempt(
        &self,
        task: &DownloadTask,
        permit: CircuitPermit<'_>,
    ) -> Result<Fetched, AttemptError> {
        let result = self.transfer(task).await;
        match &result {
            Err(AttemptError::Fetch(e)) if e.is_transient() => permit.failure(),
            Err(AttemptError::Fetch(e)) if e.is_local() => drop(permit),
            Err(AttemptError::Quota(_)) => drop(permit),
            _ => permit.success(),
        }
        result
    }

    async fn transfer(&self, task: &DownloadTask) -> Result<Fetched, AttemptError> {
        let wait = self.options.request_timeout;
        let response = timeout(wait, self.client.get(&task.url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        if classify_status(response.status) != StatusClass::Success {
            return Err(FetchError::Status {
                status: response.status,
                url:    task.url.clone(),
            }
            .into());
        }

        let declared = response.content_length;
        let mut reservation = self
            .quota
            .reserve(declared.unwrap_or(self.options.default_estimate_bytes))?;

        let staged = StagedFile::new(&self.options.staging_dir, &staging_stem(task))?;
        let mut file = tokio::fs::File::create(staged.path()).await?;
        let mut hasher = Sha256Hasher::new();
        let mut header = Vec::with_capacity(HEADER_PREFIX);
        let mut written = 0u64;
        let mut body = response.body;

        while let Some(chunk) = timeout(wait, body.next())
            .await
            .map_err(|_| FetchError::Timeout)?
        {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > reservation.bytes() {
                reservation.grow(written - reservation.bytes())?;
            }
            if header.len() < HEADER_PREFIX {
                let take = (HEADER_PREFIX - header.len()).min(chunk.len());
                header.extend_from_slice(&chunk[..take]);
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = declared {
            if written < expected {
                return Err(FetchError::Truncated {
                    expected,
                    actual: written,
                }
                .into());
            }
        }
        self.options.integrity.check_size(written)?;
        self.options.integrity.kind.check_header(&header)?;

        let bytes = reservation.commit(written)?;
        if let Err(e) = staged.commit(&task.target_path) {
            self.quota.free(bytes);
            return Err(e.into());
        }

        Ok(Fetched {
            bytes,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    /// A file already at `path` that passes integrity checks. One that fails
    /// them is removed, and its bytes returned to the quota, so it can be
    /// fetched again.
    async fn existing_file(&self, path: &Path) -> Option<FileReport> {
        let size = tokio::fs::metadata(path).await.ok()?.len();
        let policy = self.options.integrity;
        let target = path.to_path_buf();
        match tokio::task::spawn_blocking(move || inspect_file(&target, &policy)).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "existing file is invalid, refetching");
                if tokio::fs::remove_file(path).await.is_ok() {
                    self.quota.free(size);
                }
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "integrity check task failed");
                None
            }
        }
    }
}

fn staging_stem(task: &DownloadTask) -> String {
    crate::core::sanitize_component(&format!("{}-{}", task.key.source_name, task.key.source_id))
}
