//! File-type signatures and whole-file inspection.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::{Result, Sha256Hasher, VerificationError, VerifiedReader};

/// Expected type of a downloaded file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    Pdf,
}

impl FileKind {
    pub fn magic(self) -> &'static [u8] {
        match self {
            FileKind::Pdf => b"%PDF-",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
        }
    }

    /// Checks the leading bytes of a file against this kind's signature.
    pub fn check_header(self, header: &[u8]) -> Result<()> {
        let magic = self.magic();
        if header.starts_with(magic) {
            Ok(())
        } else {
            Err(VerificationError::BadSignature {
                kind:  self,
                found: header.iter().take(magic.len().max(8)).copied().collect(),
            })
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Pdf => write!(f, "PDF"),
        }
    }
}

/// What a file must satisfy to count as a complete download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntegrityPolicy {
    pub kind:      FileKind,
    pub min_bytes: u64,
}

impl IntegrityPolicy {
    pub fn new(kind: FileKind) -> Self { Self { kind, min_bytes: 1 } }

    pub fn min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes.max(1);
        self
    }

    pub fn check_size(&self, size: u64) -> Result<()> {
        if size == 0 {
            return Err(VerificationError::Empty);
        }
        if size < self.min_bytes {
            return Err(VerificationError::TooSmall {
                size,
                min: self.min_bytes,
            });
        }
        Ok(())
    }
}

/// Size and SHA-256 of a file that passed its [`IntegrityPolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReport {
    pub size:   u64,
    pub sha256: Vec<u8>,
}

impl FileReport {
    pub fn sha256_hex(&self) -> String { hex::encode(&self.sha256) }
}

/// Reads `path` once, checking signature and size while hashing.
pub fn inspect_file(path: &Path, policy: &IntegrityPolicy) -> Result<FileReport> {
    let file = File::open(path)?;
    let mut reader = VerifiedReader::new(BufReader::new(file), Sha256Hasher::new());

    let magic_len = policy.kind.magic().len();
    let mut header = vec![0u8; magic_len];
    let filled = read_up_to(&mut reader, &mut header)?;
    header.truncate(filled);

    io::copy(&mut reader, &mut io::sink())?;
    let size = reader.bytes_read();
    policy.check_size(size)?;
    policy.kind.check_header(&header)?;

    Ok(FileReport {
        size,
        sha256: reader.into_digest(),
    })
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
