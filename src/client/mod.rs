//! Torrent client backends.
//!
//! Each supported client gets an [`Adapter`] that takes a finished metafile
//! and a save path and makes the client seed it without a hash check.
//! [`Backend`] picks the adapter for a [`ClientKind`].
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::conf::{ClientConf, ClientKind};
pub use crate::error::client::Result;
use crate::error::client::ClientError;
use crate::path_map::ResolvedPaths;
use crate::reuse::ContentDescriptor;
use crate::search::TorrentSource;
use crate::Sha1Hash;

pub mod deluge;
pub mod qbit;
pub mod rencode;
pub mod rtorrent;
pub mod transmission;
pub mod watch;

pub use self::{
    deluge::Deluge, qbit::Qbit, rtorrent::Rtorrent, transmission::Transmission, watch::Watch,
};

/// Per invocation values that take precedence over the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub label: Option<String>,
}

/// Everything an adapter needs for one injection.
#[derive(Debug, Clone, Copy)]
pub struct InjectRequest<'a> {
    pub tracker: &'a str,
    /// The finished metafile.
    pub metafile: &'a [u8],
    /// Where `metafile` is on disk.
    pub metafile_path: &'a Path,
    pub info_hash: &'a Sha1Hash,
    pub content: &'a ContentDescriptor,
    /// The path to seed from, the staged link when linking succeeded.
    pub seed_path: &'a Path,
    /// The per tracker link directory, set when `seed_path` is a link.
    pub tracker_dir: Option<&'a Path>,
    pub paths: &'a ResolvedPaths,
    pub overrides: &'a Overrides,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn kind(&self) -> ClientKind;

    /// Adds the torrent to the client and starts seeding it.
    async fn inject(&self, req: &InjectRequest<'_>) -> Result<()>;
}

/// The adapter for one configured client.
pub enum Backend {
    Qbit(Qbit),
    Rtorrent(Rtorrent),
    Deluge(Deluge),
    Transmission(Transmission),
    Watch(Watch),
}

impl Backend {
    pub fn from_conf(conf: &ClientConf) -> Result<Self> {
        Ok(match conf.kind {
            ClientKind::Qbit => Backend::Qbit(Qbit::new(conf.clone())?),
            ClientKind::Rtorrent => Backend::Rtorrent(Rtorrent::new(conf.clone())?),
            ClientKind::Deluge => Backend::Deluge(Deluge::new(conf.clone())),
            ClientKind::Transmission => Backend::Transmission(Transmission::new(conf.clone())?),
            ClientKind::Watch => Backend::Watch(Watch::new(conf.clone())),
        })
    }

    /// The searchable side of the client, if it has one.
    pub fn as_source(&self) -> Option<&dyn TorrentSource> {
        match self {
            Backend::Qbit(qbit) => Some(qbit as &dyn TorrentSource),
            _ => None,
        }
    }

    fn adapter(&self) -> &dyn Adapter {
        match self {
            Backend::Qbit(a) => a,
            Backend::Rtorrent(a) => a,
            Backend::Deluge(a) => a,
            Backend::Transmission(a) => a,
            Backend::Watch(a) => a,
        }
    }
}

#[async_trait]
impl Adapter for Backend {
    fn kind(&self) -> ClientKind {
        self.adapter().kind()
    }

    async fn inject(&self, req: &InjectRequest<'_>) -> Result<()> {
        log::debug!("Adding {} to {:?}", req.tracker, self.kind());
        self.adapter().inject(req).await
    }
}

/// Builds the http client shared by the web api backends.
pub(crate) fn http_client(conf: &ClientConf, cookies: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(conf.request_timeout())
        .danger_accept_invalid_certs(!conf.verify_certificate)
        .cookie_store(cookies)
        .build()
        .map_err(|e| ClientError::Protocol(e.to_string()))
}

/// The directory the client should save into when the content itself is
/// `seed_path`: its parent, in the client's view.
pub(crate) fn remote_parent(seed_path: &Path, paths: &ResolvedPaths) -> String {
    let remote = paths.to_remote(seed_path).replace('\\', "/");
    parent_dir(&remote)
}

pub(crate) fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => trimmed[..i].to_string(),
        None => String::new(),
    }
}

/// Polls `check` once per `interval` until it reports true or `timeout`
/// passes.
pub(crate) async fn wait_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(());
        }
        if tokio::time::Instant::now() + interval > deadline {
            return Err(ClientError::ConfirmTimeout(timeout));
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_take_parent_of_remote_path() {
        assert_eq!(parent_dir("/mnt/data/movies/X"), "/mnt/data/movies");
        assert_eq!(parent_dir("/mnt/data/movies/X/"), "/mnt/data/movies");
        assert_eq!(parent_dir("/X"), "/");
        assert_eq!(parent_dir("X"), "");
    }

    #[test]
    fn should_translate_before_taking_parent() {
        let paths = ResolvedPaths {
            local: "/data".into(),
            remote: "/mnt/data".into(),
        };
        assert_eq!(
            remote_parent(Path::new("/data/movies/X.mkv"), &paths),
            "/mnt/data/movies"
        );
    }

    #[tokio::test]
    async fn should_time_out_when_never_confirmed() {
        let err = wait_until(Duration::from_millis(30), Duration::from_millis(10), || async {
            Ok(false)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::ConfirmTimeout(_)));
    }

    #[tokio::test]
    async fn should_stop_polling_once_confirmed() {
        let mut calls = 0;
        wait_until(Duration::from_secs(5), Duration::from_millis(1), || {
            calls += 1;
            let done = calls == 3;
            async move { Ok(done) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
    }
}
