pub use serde_bencode::Error as BencodeError;

pub type Result<T, E = MetainfoError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum MetainfoError {
    #[error("{0}")]
    Bencode(BencodeError),
    #[error("Invalid Metainfo")]
    InvalidMetainfo,
    #[error("Invalid Pieces")]
    InvalidPieces,
    #[error("{0}")]
    Io(std::io::Error),
}

impl From<BencodeError> for MetainfoError {
    fn from(error: BencodeError) -> Self {
        Self::Bencode(error)
    }
}

impl From<std::io::Error> for MetainfoError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}
