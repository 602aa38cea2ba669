//! qBittorrent Web API backend.
//!
//! The api authenticates with a session cookie obtained from
//! `/api/v2/auth/login`. The login happens once, on the first call.
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde_derive::Deserialize;
use tokio::sync::OnceCell;

use super::{http_client, wait_until, Adapter, InjectRequest, Result};
use crate::conf::{ClientConf, ClientKind, LinkMode};
use crate::error::client::ClientError;
use crate::info_hash::{self, HashCase};
use crate::path_map::{self, ResolvedPaths};
use crate::reuse::ContentDescriptor;
use crate::search::{ClientTorrent, TorrentSource, TrackerStatus};

const LOGIN_OK: &str = "Ok.";

#[derive(Debug, Deserialize)]
struct Properties {
    #[serde(default)]
    comment: String,
}

pub struct Qbit {
    conf: ClientConf,
    http: Client,
    base: String,
    login: OnceCell<()>,
    poll_interval: Duration,
}

impl Qbit {
    pub fn new(conf: ClientConf) -> Result<Self> {
        let http = http_client(&conf, true)?;
        let base = conf.endpoint();
        Ok(Self {
            conf,
            http,
            base,
            login: OnceCell::new(),
            poll_interval: Duration::from_secs(1),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base, path)
    }

    async fn ensure_login(&self) -> Result<()> {
        self.login
            .get_or_try_init(|| async {
                let resp = self
                    .http
                    .post(self.url("auth/login"))
                    .header(reqwest::header::REFERER, &self.base)
                    .form(&[
                        ("username", self.conf.username.as_str()),
                        ("password", self.conf.password.as_str()),
                    ])
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                if resp.trim() != LOGIN_OK {
                    log::error!("Incorrect qBittorrent login credentials");
                    return Err(ClientError::AuthRejected);
                }
                log::debug!("Logged in to qBittorrent at {}", self.base);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        self.ensure_login().await?;
        Ok(self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await?
            .error_for_status()?)
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<Response> {
        self.ensure_login().await?;
        Ok(self
            .http
            .post(self.url(path))
            .form(form)
            .send()
            .await?
            .error_for_status()?)
    }

    async fn torrents_info(&self, hash: Option<&str>) -> Result<Vec<ClientTorrent>> {
        let query: Vec<(&str, &str)> = hash.map(|h| ("hashes", h)).into_iter().collect();
        Ok(self.get("torrents/info", &query).await?.json().await?)
    }

    async fn add(&self, req: &InjectRequest<'_>, save_path: &str, auto_tmm: bool) -> Result<()> {
        self.ensure_login().await?;
        let file_name = req
            .metafile_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.torrent".to_string());
        let part = Part::bytes(req.metafile.to_vec())
            .file_name(file_name)
            .mime_str("application/x-bittorrent")?;
        let mut form = Form::new()
            .part("torrents", part)
            .text("savepath", save_path.to_string())
            .text("autoTMM", auto_tmm.to_string())
            .text("skip_checking", "true")
            .text("contentLayout", self.conf.content_layout.clone());
        if let Some(category) = req
            .overrides
            .category
            .as_ref()
            .or(self.conf.category.as_ref())
        {
            form = form.text("category", category.clone());
        }

        let body = self
            .http
            .post(self.url("torrents/add"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        if body.trim() != LOGIN_OK {
            return Err(ClientError::Rpc(format!("torrent was not added: {}", body.trim())));
        }
        Ok(())
    }

    /// Starts the torrent. qBittorrent 5 renamed `resume` to `start`.
    async fn resume(&self, hash: &str) -> Result<()> {
        match self.post("torrents/resume", &[("hashes", hash)]).await {
            Err(ClientError::Http(status)) if status == StatusCode::NOT_FOUND => {
                self.post("torrents/start", &[("hashes", hash)]).await?;
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    fn tag<'a>(&'a self, req: &'a InjectRequest<'_>) -> Option<&'a str> {
        if self.conf.use_tracker_as_tag {
            Some(req.tracker)
        } else {
            req.overrides
                .tag
                .as_deref()
                .or(self.conf.tag.as_deref())
                .filter(|t| !t.is_empty())
        }
    }
}

/// The local directory the torrent's content sits in.
///
/// A single file inside its own release directory is saved into that
/// directory; everything else into the parent of the content path.
fn content_dir(content: &ContentDescriptor) -> PathBuf {
    let keep_self = !content.keep_folder && content.files.len() == 1 && content.is_dir;
    if keep_self {
        content.path.clone()
    } else {
        content
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| content.path.clone())
    }
}

/// The save path to hand to qBittorrent and whether automatic torrent
/// management should be enabled for it.
pub(crate) fn save_path(
    content: &ContentDescriptor,
    tracker_dir: Option<&Path>,
    paths: &ResolvedPaths,
    linking: LinkMode,
    automatic_management_paths: &[String],
) -> (String, bool) {
    let local = match tracker_dir {
        Some(dir) => dir.to_path_buf(),
        None => content_dir(content),
    };
    let mut remote = paths.to_remote(&local).replace('\\', "/");
    if !remote.ends_with('/') {
        remote.push('/');
    }

    let local_norm = path_map::normalize(&local.to_string_lossy()).to_lowercase();
    // automatic management would move the links, or the content a failed
    // link fell back to
    let auto_tmm = linking == LinkMode::None
        && tracker_dir.is_none()
        && automatic_management_paths
            .iter()
            .filter(|p| !p.trim().is_empty())
            .any(|p| local_norm.contains(&path_map::normalize(p).to_lowercase()));
    (remote, auto_tmm)
}

#[async_trait]
impl Adapter for Qbit {
    fn kind(&self) -> ClientKind {
        ClientKind::Qbit
    }

    async fn inject(&self, req: &InjectRequest<'_>) -> Result<()> {
        let hash = info_hash::to_hex(req.info_hash, HashCase::Lower);
        let (save_path, auto_tmm) = save_path(
            req.content,
            req.tracker_dir,
            req.paths,
            self.conf.linking,
            &self.conf.automatic_management_paths,
        );
        log::info!("qBittorrent save path: {}", save_path);

        self.add(req, &save_path, auto_tmm).await?;

        let timeout = self.conf.confirm_timeout();
        wait_until(timeout, self.poll_interval, || async {
            Ok::<_, ClientError>(!self.torrents_info(Some(&hash)).await?.is_empty())
        })
        .await
        .map_err(|e| {
            log::warn!("Torrent addition timed out for {}", hash);
            e
        })?;

        self.resume(&hash).await?;
        if let Some(tag) = self.tag(req) {
            self.post("torrents/addTags", &[("hashes", hash.as_str()), ("tags", tag)])
                .await?;
        }
        log::info!("Added {} to qBittorrent", hash);
        Ok(())
    }
}

#[async_trait]
impl TorrentSource for Qbit {
    async fn list_torrents(&self) -> Result<Vec<ClientTorrent>> {
        self.torrents_info(None).await
    }

    async fn file_count(&self, hash: &str) -> Result<usize> {
        let files: Vec<serde_json::Value> =
            self.get("torrents/files", &[("hash", hash)]).await?.json().await?;
        Ok(files.len())
    }

    async fn export_torrent(&self, hash: &str) -> Result<Vec<u8>> {
        let bytes = self
            .get("torrents/export", &[("hash", hash)])
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn trackers(&self, hash: &str) -> Result<Vec<TrackerStatus>> {
        Ok(self
            .get("torrents/trackers", &[("hash", hash)])
            .await?
            .json()
            .await?)
    }

    async fn comment(&self, hash: &str) -> Result<Option<String>> {
        let props: Properties = self
            .get("torrents/properties", &[("hash", hash)])
            .await?
            .json()
            .await?;
        Ok(Some(props.comment).filter(|c| !c.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::client::Overrides;
    use crate::fixture::{client_conf, MetafileBuilder};
    use crate::metainfo::Metainfo;

    fn content(path: &str, files: usize, is_dir: bool) -> ContentDescriptor {
        let path = PathBuf::from(path);
        ContentDescriptor {
            release_name: "X".into(),
            files: (0..files).map(|i| path.join(format!("{i}.mkv"))).collect(),
            path,
            is_disc: false,
            keep_folder: false,
            is_dir,
        }
    }

    fn data_paths() -> ResolvedPaths {
        ResolvedPaths {
            local: "/data".into(),
            remote: "/mnt/data".into(),
        }
    }

    #[test]
    fn should_save_into_parent_of_release() {
        let (path, auto) = save_path(
            &content("/data/movies/X", 2, true),
            None,
            &data_paths(),
            LinkMode::None,
            &["/data/movies".into()],
        );
        assert_eq!(path, "/mnt/data/movies/");
        assert!(auto);
    }

    #[test]
    fn should_not_manage_unlinked_fallback_when_linking_is_on() {
        let (path, auto) = save_path(
            &content("/data/movies/X", 2, true),
            None,
            &data_paths(),
            LinkMode::Hardlink,
            &["/data/movies".into()],
        );
        assert_eq!(path, "/mnt/data/movies/");
        assert!(!auto);
    }

    #[test]
    fn should_save_single_file_into_its_directory() {
        let (path, auto) = save_path(
            &content("/data/movies/X", 1, true),
            None,
            &data_paths(),
            LinkMode::None,
            &[],
        );
        assert_eq!(path, "/mnt/data/movies/X/");
        assert!(!auto);
    }

    #[test]
    fn should_save_linked_content_into_tracker_dir() {
        let (path, auto) = save_path(
            &content("/data/movies/X", 2, true),
            Some(Path::new("/data/linked/AITHER")),
            &data_paths(),
            LinkMode::Hardlink,
            &["/data".into()],
        );
        assert_eq!(path, "/mnt/data/linked/AITHER/");
        assert!(!auto);
    }

    fn conf(url: &str, extra: serde_json::Value) -> ClientConf {
        let mut value = json!({
            "kind": "qbit",
            "url": url,
            "username": "admin",
            "password": "secret",
            "category": "upload"
        });
        if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        client_conf(value)
    }

    #[tokio::test]
    async fn should_add_confirm_resume_and_tag() {
        let mut server = Server::new_async().await;
        let metafile = MetafileBuilder::single("X.mkv", 100).build();
        let hash = Metainfo::from_bytes(&metafile)
            .unwrap()
            .info_hash_hex(HashCase::Lower);

        let login = server
            .mock("POST", "/api/v2/auth/login")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("username".into(), "admin".into()),
                Matcher::UrlEncoded("password".into(), "secret".into()),
            ]))
            .with_body("Ok.")
            .expect(1)
            .create_async()
            .await;
        let add = server
            .mock("POST", "/api/v2/torrents/add")
            .with_body("Ok.")
            .create_async()
            .await;
        let info = server
            .mock("GET", "/api/v2/torrents/info")
            .match_query(Matcher::UrlEncoded("hashes".into(), hash.clone()))
            .with_body(json!([{ "hash": hash, "name": "X.mkv" }]).to_string())
            .create_async()
            .await;
        let resume = server
            .mock("POST", "/api/v2/torrents/resume")
            .match_body(Matcher::UrlEncoded("hashes".into(), hash.clone()))
            .create_async()
            .await;
        let tags = server
            .mock("POST", "/api/v2/torrents/addTags")
            .match_body(Matcher::UrlEncoded("tags".into(), "AITHER".into()))
            .create_async()
            .await;

        let qbit = Qbit::new(conf(&server.url(), json!({ "use_tracker_as_tag": true }))).unwrap();
        let parsed = Metainfo::from_bytes(&metafile).unwrap();
        let content = content("/data/X.mkv", 1, false);
        qbit.inject(&InjectRequest {
            tracker: "AITHER",
            metafile: &metafile,
            metafile_path: Path::new("/tmp/[AITHER].torrent"),
            info_hash: &parsed.info_hash,
            content: &content,
            seed_path: &content.path,
            tracker_dir: None,
            paths: &data_paths(),
            overrides: &Overrides::default(),
        })
        .await
        .unwrap();

        login.assert_async().await;
        add.assert_async().await;
        info.assert_async().await;
        resume.assert_async().await;
        tags.assert_async().await;
    }

    #[tokio::test]
    async fn should_time_out_when_torrent_never_shows_up() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v2/auth/login")
            .with_body("Ok.")
            .create_async()
            .await;
        server
            .mock("POST", "/api/v2/torrents/add")
            .with_body("Ok.")
            .create_async()
            .await;
        server
            .mock("GET", "/api/v2/torrents/info")
            .match_query(Matcher::Any)
            .with_body("[]")
            .create_async()
            .await;

        let qbit = Qbit::new(conf(&server.url(), json!({ "confirm_timeout_secs": 0 })))
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let metafile = MetafileBuilder::single("X.mkv", 100).build();
        let parsed = Metainfo::from_bytes(&metafile).unwrap();
        let content = content("/data/X.mkv", 1, false);
        let err = qbit
            .inject(&InjectRequest {
                tracker: "AITHER",
                metafile: &metafile,
                metafile_path: Path::new("/tmp/[AITHER].torrent"),
                info_hash: &parsed.info_hash,
                content: &content,
                seed_path: &content.path,
                tracker_dir: None,
                paths: &data_paths(),
                overrides: &Overrides::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConfirmTimeout(_)));
    }

    #[tokio::test]
    async fn should_reject_bad_credentials() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v2/auth/login")
            .with_body("Fails.")
            .create_async()
            .await;

        let qbit = Qbit::new(conf(&server.url(), json!({}))).unwrap();
        let err = qbit.list_torrents().await.unwrap_err();
        assert!(matches!(err, ClientError::AuthRejected));
    }

    #[tokio::test]
    async fn should_report_unreachable_client() {
        let qbit = Qbit::new(conf("http://127.0.0.1:1", json!({}))).unwrap();
        let err = qbit.list_torrents().await.unwrap_err();
        assert!(matches!(err, ClientError::Unreachable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn should_read_trackers_and_comment() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v2/auth/login")
            .with_body("Ok.")
            .create_async()
            .await;
        server
            .mock("GET", "/api/v2/torrents/trackers")
            .match_query(Matcher::UrlEncoded("hash".into(), "abc".into()))
            .with_body(
                json!([
                    { "url": "** [DHT] **", "status": 2, "msg": "" },
                    { "url": "https://t.example/announce", "status": 4, "msg": "unregistered" }
                ])
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api/v2/torrents/properties")
            .match_query(Matcher::UrlEncoded("hash".into(), "abc".into()))
            .with_body(json!({ "comment": "https://aither.cc/torrents/7", "save_path": "/x" }).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/api/v2/torrents/files")
            .match_query(Matcher::UrlEncoded("hash".into(), "abc".into()))
            .with_body(json!([{ "name": "a" }, { "name": "b" }]).to_string())
            .create_async()
            .await;

        let qbit = Qbit::new(conf(&server.url(), json!({}))).unwrap();
        let trackers = qbit.trackers("abc").await.unwrap();
        assert!(trackers[0].is_pseudo());
        assert!(!trackers[1].is_working());
        assert_eq!(
            qbit.comment("abc").await.unwrap().as_deref(),
            Some("https://aither.cc/torrents/7")
        );
        assert_eq!(qbit.file_count("abc").await.unwrap(), 2);
    }
}
