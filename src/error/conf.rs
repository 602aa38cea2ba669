pub type Result<T, E = ConfError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ConfError {
    #[error("no torrent client named {0:?} in configuration")]
    UnknownClient(String),

    #[error("invalid tracker pattern for {site}: {source}")]
    InvalidPattern { site: String, source: regex::Error },

    #[error("{0}")]
    Json(serde_json::Error),

    #[error("{0}")]
    Io(std::io::Error),
}

impl From<serde_json::Error> for ConfError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<std::io::Error> for ConfError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
