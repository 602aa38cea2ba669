use std::time::Duration;

use reqwest::{Error as HttpError, StatusCode};

use crate::error::metainfo::BencodeError;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    /// Network or connection failure, check host and port.
    Unreachable(String),

    #[error("authentication rejected")]
    /// The client refused our credentials.
    AuthRejected,

    #[error("unexpected http status {0}")]
    Http(StatusCode),

    #[error("rpc fault: {0}")]
    /// The client answered but reported a failure for the call.
    Rpc(String),

    #[error("invalid response: {0}")]
    Protocol(String),

    #[error("torrent not visible in client after {0:?}")]
    /// The torrent did not show up in the client's list in time.
    ConfirmTimeout(Duration),

    #[error("{0}")]
    Bencode(BencodeError),

    #[error("{0}")]
    Io(std::io::Error),
}

impl From<HttpError> for ClientError {
    fn from(value: HttpError) -> Self {
        if value.is_connect() || value.is_timeout() {
            Self::Unreachable(value.to_string())
        } else if let Some(status) = value.status() {
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                Self::AuthRejected
            } else {
                Self::Http(status)
            }
        } else {
            Self::Protocol(value.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<BencodeError> for ClientError {
    fn from(value: BencodeError) -> Self {
        Self::Bencode(value)
    }
}

impl From<native_tls::Error> for ClientError {
    fn from(value: native_tls::Error) -> Self {
        Self::Unreachable(value.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        Self::Protocol(value.to_string())
    }
}
