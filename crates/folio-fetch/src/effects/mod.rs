//! I/O edge: HTTP, pacing, failure isolation, byte accounting and the
//! download state machine that ties them together.

mod circuit;
mod download;
mod http;
mod quota;
mod rate_gate;

pub use circuit::{CircuitBreaker, CircuitPermit, CircuitState};
pub use download::DownloadManager;
pub use http::{BoxStream, HttpClient, HttpResponse};
pub use quota::{QuotaSnapshot, QuotaState, Reservation, StorageQuota};
pub use rate_gate::{
    ARXIV_API_FLOOR, ARXIV_FILE_FLOOR, DEFAULT_FLOOR, RateGate, RateGateBuilder, floor_for,
};

#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
