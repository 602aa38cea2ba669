//! Set of module Error
pub mod client;
pub mod conf;
pub mod link;
pub mod metainfo;
pub mod resume;

use self::{
    client::ClientError, conf::ConfError, link::LinkError, metainfo::MetainfoError,
    resume::ResumeError,
};

pub type Result<T, E = InjectError> = std::result::Result<T, E>;

/// The flat failure classification handed back to callers so they can decide
/// whether to retry with a different client or skip the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    UnreachableClient,
    AuthRejected,
    MetafileUnreadable,
    LinkTargetMissing,
    ResumeSizeMismatch,
    ConfirmTimeout,
    Backend,
    Io,
    Conf,
}

/// Error returned when a single injection for a tracker fails.
///
/// None of these are retried inside this crate. Each carries the tracker
/// name so a batch caller can report it and carry on with the others.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("[{tracker}] torrent client unreachable: {detail}")]
    /// The client's control interface could not be reached.
    Unreachable { tracker: String, detail: String },

    #[error("[{tracker}] torrent client rejected the credentials")]
    /// Login was refused by the client.
    AuthRejected { tracker: String },

    #[error("[{tracker}] cannot read metafile: {source}")]
    Metafile {
        tracker: String,
        source: MetainfoError,
    },

    #[error("[{tracker}] no suitable linked folder found for drive {drive}")]
    /// Linking was requested but no candidate directory lives on the
    /// content's volume.
    LinkTargetMissing { tracker: String, drive: String },

    #[error("[{tracker}] cannot build fast resume data: {source}")]
    Resume { tracker: String, source: ResumeError },

    #[error("[{tracker}] {source}")]
    Backend { tracker: String, source: ClientError },

    #[error("[{tracker}] {source}")]
    Io {
        tracker: String,
        source: std::io::Error,
    },

    #[error("{0}")]
    Conf(ConfError),
}

impl InjectError {
    /// Sorts a backend error into the user-actionable variants.
    pub fn from_client(tracker: &str, error: ClientError) -> Self {
        let tracker = tracker.to_string();
        match error {
            ClientError::Unreachable(detail) => Self::Unreachable { tracker, detail },
            ClientError::AuthRejected => Self::AuthRejected { tracker },
            source => Self::Backend { tracker, source },
        }
    }

    pub fn from_link(tracker: &str, error: LinkError) -> Self {
        let tracker = tracker.to_string();
        match error {
            LinkError::TargetMissing { drive } => Self::LinkTargetMissing { tracker, drive },
            LinkError::CreateFailed { source, .. } | LinkError::Io(source) => {
                Self::Io { tracker, source }
            }
        }
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Unreachable { .. } => FailureReason::UnreachableClient,
            Self::AuthRejected { .. } => FailureReason::AuthRejected,
            Self::Metafile { .. } => FailureReason::MetafileUnreadable,
            Self::LinkTargetMissing { .. } => FailureReason::LinkTargetMissing,
            Self::Resume {
                source: ResumeError::SizeMismatch { .. },
                ..
            } => FailureReason::ResumeSizeMismatch,
            Self::Resume { .. } => FailureReason::Io,
            Self::Backend {
                source: ClientError::ConfirmTimeout(_),
                ..
            } => FailureReason::ConfirmTimeout,
            Self::Backend { .. } => FailureReason::Backend,
            Self::Io { .. } => FailureReason::Io,
            Self::Conf(_) => FailureReason::Conf,
        }
    }

    /// The tracker this failure belongs to, if any.
    pub fn tracker(&self) -> Option<&str> {
        match self {
            Self::Unreachable { tracker, .. }
            | Self::AuthRejected { tracker }
            | Self::Metafile { tracker, .. }
            | Self::LinkTargetMissing { tracker, .. }
            | Self::Resume { tracker, .. }
            | Self::Backend { tracker, .. }
            | Self::Io { tracker, .. } => Some(tracker),
            Self::Conf(_) => None,
        }
    }
}

impl From<ConfError> for InjectError {
    fn from(value: ConfError) -> Self {
        Self::Conf(value)
    }
}
