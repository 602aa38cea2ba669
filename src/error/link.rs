use std::path::PathBuf;

pub type Result<T, E = LinkError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no suitable linked folder found for drive {drive}")]
    /// Linking is enabled but none of the candidate folders is on the
    /// content's volume. There is no fallback for this.
    TargetMissing { drive: String },

    #[error("failed to link {src:?} to {dst:?}: {source}")]
    /// A link could not be created. Callers treat this as a warning and
    /// keep using the unlinked source path.
    CreateFailed {
        src: PathBuf,
        dst: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for LinkError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
