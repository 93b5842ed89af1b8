//! Content verification for downloaded papers.
//!
//! Hashing is incremental so a file is read exactly once to learn its size,
//! digest and leading signature.
//!
//! # Example
//!
//! ```
//! use folio_verify::{FileKind, IntegrityPolicy};
//!
//! let policy = IntegrityPolicy::new(FileKind::Pdf);
//! assert!(policy.kind.check_header(b"%PDF-1.5").is_ok());
//! assert!(policy.check_size(0).is_err());
//! ```

pub use self::error::{Result, VerificationError};
pub use self::hasher::{Hasher, Sha256Hasher};
pub use self::reader::VerifiedReader;
pub use self::signature::{FileKind, FileReport, IntegrityPolicy, inspect_file};

mod error;
mod hasher;
mod reader;
mod signature;
