use std::io;

use crate::FileKind;

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("file is empty")]
    Empty,

    #[error("file too small: {size} bytes (minimum {min})")]
    TooSmall { size: u64, min: u64 },

    #[error("not a {kind} file: header starts with {found:?}")]
    BadSignature { kind: FileKind, found: Vec<u8> },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, VerificationError>;
