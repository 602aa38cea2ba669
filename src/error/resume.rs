use std::path::PathBuf;

use crate::error::metainfo::{BencodeError, MetainfoError};

pub type Result<T, E = ResumeError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    #[error("file size mismatch for {path:?} [is {actual}, expected {expected}]")]
    /// Resume data for a file whose size differs from the metafile would make
    /// the client trust corrupt data, so this is always fatal.
    SizeMismatch {
        path: PathBuf,
        actual: u64,
        expected: u64,
    },

    #[error("{0}")]
    Metainfo(MetainfoError),

    #[error("{0}")]
    Io(std::io::Error),
}

impl From<MetainfoError> for ResumeError {
    fn from(value: MetainfoError) -> Self {
        Self::Metainfo(value)
    }
}

impl From<BencodeError> for ResumeError {
    fn from(value: BencodeError) -> Self {
        Self::Metainfo(MetainfoError::Bencode(value))
    }
}

impl From<std::io::Error> for ResumeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
