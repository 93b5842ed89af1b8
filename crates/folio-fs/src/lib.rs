//! Filesystem primitives for the folio pipeline.
//!
//! - [`atomic_write`]: write-to-temp-then-rename replacement for small
//!   documents such as checkpoints and stored records.
//! - [`StagedFile`]: streaming target for downloads that is renamed into its
//!   final location on commit and deleted if dropped uncommitted.
//! - [`disk_usage`]: byte accounting of an existing storage tree.

mod atomic_write;
mod error;
mod staging;
mod usage;

pub use atomic_write::{AtomicWriteOptions, atomic_read, atomic_write};
pub use error::{Error, Result};
pub use staging::{STAGING_EXTENSION, StagedFile, sweep_staging};
pub use usage::disk_usage;
