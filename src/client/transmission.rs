//! Transmission JSON-RPC backend.
//!
//! Transmission guards its RPC endpoint with a session id. The first call
//! is answered with 409 and the id to use in a header; the call is then
//! repeated with it.
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{http_client, remote_parent, Adapter, InjectRequest, Result};
use crate::conf::{ClientConf, ClientKind};
use crate::error::client::ClientError;

const SESSION_HEADER: &str = "X-Transmission-Session-Id";
const MAX_ATTEMPTS: usize = 3;

pub struct Transmission {
    conf: ClientConf,
    http: Client,
    url: String,
    session_id: Mutex<Option<String>>,
}

impl Transmission {
    pub fn new(conf: ClientConf) -> Result<Self> {
        let http = http_client(&conf, false)?;
        let path = conf.rpc_path.trim();
        let url = if path.starts_with('/') {
            format!("{}{}", conf.endpoint(), path)
        } else {
            format!("{}/{}", conf.endpoint(), path)
        };
        Ok(Self {
            conf,
            http,
            url,
            session_id: Mutex::new(None),
        })
    }

    async fn rpc(&self, payload: &Value) -> Result<Value> {
        let mut session_id = self.session_id.lock().await;
        for _ in 0..MAX_ATTEMPTS {
            let mut request = self.http.post(&self.url).json(payload);
            if let Some(id) = session_id.as_deref() {
                request = request.header(SESSION_HEADER, id);
            }
            if !self.conf.username.is_empty() {
                request = request.basic_auth(&self.conf.username, Some(&self.conf.password));
            }

            let response = request.send().await?;
            if response.status() == StatusCode::CONFLICT {
                *session_id = response
                    .headers()
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                log::debug!("Negotiated Transmission session id {:?}", session_id.as_deref());
                continue;
            }
            return Ok(response.error_for_status()?.json().await?);
        }
        Err(ClientError::Protocol(
            "failed negotiating transmission session id".into(),
        ))
    }
}

#[async_trait]
impl Adapter for Transmission {
    fn kind(&self) -> ClientKind {
        ClientKind::Transmission
    }

    async fn inject(&self, req: &InjectRequest<'_>) -> Result<()> {
        let download_dir = remote_parent(req.seed_path, req.paths);
        let mut arguments = json!({
            "metainfo": base64::engine::general_purpose::STANDARD.encode(req.metafile),
            "download-dir": download_dir,
            "paused": false,
        });
        let label = req
            .overrides
            .label
            .as_deref()
            .or(self.conf.label.as_deref())
            .filter(|l| !l.is_empty());
        if let Some(label) = label {
            arguments["labels"] = json!([label]);
        }
        log::info!("Adding {} to Transmission at {}", req.tracker, download_dir);

        let response = self
            .rpc(&json!({ "method": "torrent-add", "arguments": arguments }))
            .await?;
        let result = response
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if result != "success" {
            log::error!("Transmission refused the torrent: {}", result);
            return Err(ClientError::Rpc(result.to_string()));
        }

        let args = response.get("arguments");
        if let Some(dup) = args.and_then(|a| a.get("torrent-duplicate")) {
            log::warn!(
                "Transmission already has {}",
                dup.get("hashString").and_then(Value::as_str).unwrap_or("torrent")
            );
        } else if let Some(added) = args.and_then(|a| a.get("torrent-added")) {
            log::debug!(
                "Transmission added {}",
                added.get("hashString").and_then(Value::as_str).unwrap_or("torrent")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use mockito::{Matcher, Server};

    use super::*;
    use crate::client::Overrides;
    use crate::fixture::{client_conf, MetafileBuilder};
    use crate::metainfo::Metainfo;
    use crate::path_map::ResolvedPaths;
    use crate::reuse::ContentDescriptor;

    fn transmission(url: &str) -> Transmission {
        Transmission::new(client_conf(json!({
            "kind": "transmission",
            "url": url,
            "username": "admin",
            "password": "secret",
            "label": "configured"
        })))
        .unwrap()
    }

    async fn inject_movie(client: &Transmission, overrides: &Overrides) -> Result<()> {
        let metafile = MetafileBuilder::single("X.mkv", 10).build();
        let parsed = Metainfo::from_bytes(&metafile).unwrap();
        let content = ContentDescriptor {
            path: "/data/movies/X.mkv".into(),
            release_name: "X".into(),
            files: vec!["/data/movies/X.mkv".into()],
            is_disc: false,
            keep_folder: false,
            is_dir: false,
        };
        let paths = ResolvedPaths {
            local: "/data".into(),
            remote: "/mnt/data".into(),
        };
        client
            .inject(&InjectRequest {
                tracker: "AITHER",
                metafile: &metafile,
                metafile_path: Path::new("/tmp/[AITHER].torrent"),
                info_hash: &parsed.info_hash,
                content: &content,
                seed_path: &content.path,
                tracker_dir: None,
                paths: &paths,
                overrides,
            })
            .await
    }

    #[tokio::test]
    async fn should_negotiate_session_and_add() {
        let mut server = Server::new_async().await;
        let conflict = server
            .mock("POST", "/transmission/rpc")
            .match_header(SESSION_HEADER, Matcher::Missing)
            .with_status(409)
            .with_header(SESSION_HEADER, "sid-1")
            .expect(1)
            .create_async()
            .await;
        let add = server
            .mock("POST", "/transmission/rpc")
            .match_header(SESSION_HEADER, "sid-1")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .match_body(Matcher::PartialJson(json!({
                "method": "torrent-add",
                "arguments": {
                    "download-dir": "/mnt/data/movies",
                    "labels": ["override"]
                }
            })))
            .with_body(
                json!({
                    "result": "success",
                    "arguments": { "torrent-added": { "hashString": "abc" } }
                })
                .to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        let client = transmission(&server.url());
        let overrides = Overrides {
            label: Some("override".into()),
            ..Default::default()
        };
        inject_movie(&client, &overrides).await.unwrap();
        // the negotiated id is kept for later calls
        inject_movie(&client, &overrides).await.unwrap();

        conflict.assert_async().await;
        add.assert_async().await;
    }

    #[tokio::test]
    async fn should_report_failed_result() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/transmission/rpc")
            .match_body(Matcher::PartialJson(json!({
                "arguments": { "labels": ["configured"] }
            })))
            .with_body(json!({ "result": "invalid or corrupt torrent file" }).to_string())
            .create_async()
            .await;

        let err = inject_movie(&transmission(&server.url()), &Overrides::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ClientError::Rpc(ref m) if m == "invalid or corrupt torrent file"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn should_give_up_on_endless_conflicts() {
        let mut server = Server::new_async().await;
        let conflict = server
            .mock("POST", "/transmission/rpc")
            .with_status(409)
            .with_header(SESSION_HEADER, "again")
            .expect(MAX_ATTEMPTS)
            .create_async()
            .await;

        let err = inject_movie(&transmission(&server.url()), &Overrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)), "{err:?}");
        conflict.assert_async().await;
    }

    #[tokio::test]
    async fn should_map_unauthorized_to_auth_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/transmission/rpc")
            .with_status(401)
            .create_async()
            .await;

        let err = inject_movie(&transmission(&server.url()), &Overrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::AuthRejected), "{err:?}");
    }
}
