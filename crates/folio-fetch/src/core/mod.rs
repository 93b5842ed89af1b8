//! Pure transformations: retry scheduling, status classification, storage
//! layout. Nothing here touches the network, the filesystem or a clock.

mod classify;
mod layout;
mod retry;

pub use classify::{StatusClass, classify_status};
pub use layout::{UNCATEGORIZED, sanitize_component, target_path};
pub use retry::{RetryDecision, RetryState, retry_delay};
