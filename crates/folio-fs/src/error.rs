use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to write {path}: {source}")]
    Write {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {from} into {to}: {source}")]
    Rename {
        from:   PathBuf,
        to:     PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path has no parent directory: {0}")]
    NoParent(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// `true` when the underlying cause is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        let source = match self {
            Error::Write { source, .. }
            | Error::Read { source, .. }
            | Error::Rename { source, .. }
            | Error::CreateDir { source, .. } => source,
            Error::NoParent(_) => return false,
        };
        source.kind() == std::io::ErrorKind::NotFound
    }
}
