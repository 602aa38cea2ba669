//! rTorrent XML-RPC backend.
//!
//! rTorrent has no upload call. It loads the metafile from a path it can
//! read itself, so the resume augmented side file has to be somewhere the
//! daemon sees. When the daemon runs behind a path map the side file is
//! copied next to the content as `fr.torrent` for the duration of the call.
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

use super::{http_client, parent_dir, Adapter, InjectRequest, Result};
use crate::conf::{ClientConf, ClientKind};
use crate::error::client::ClientError;
use crate::info_hash::{self, HashCase};

const FAST_RESUME_COPY: &str = "fr.torrent";

static FAULT_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<name>faultString</name>\s*<value>\s*(?:<string>)?(.*?)(?:</string>)?\s*</value>",
    )
    .expect("fault pattern is valid")
});

pub struct Rtorrent {
    conf: ClientConf,
    http: Client,
    url: String,
    /// Pause between loading a torrent and labelling it, the daemon needs
    /// a moment before the new hash is addressable.
    settle: Duration,
}

impl Rtorrent {
    pub fn new(conf: ClientConf) -> Result<Self> {
        let http = http_client(&conf, false)?;
        let url = conf.endpoint();
        Ok(Self {
            conf,
            http,
            url,
            settle: Duration::from_secs(1),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Performs one call. A `<fault>` answer is an error even though it
    /// arrives with status 200.
    async fn call(&self, method: &str, params: &[&str]) -> Result<String> {
        log::trace!("rTorrent call {} {:?}", method, params);
        let body = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(xmlrpc_request(method, params))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        if body.contains("<fault>") {
            let detail = fault_string(&body).unwrap_or_else(|| "unknown fault".to_string());
            log::error!("rTorrent fault on {}: {}", method, detail);
            return Err(ClientError::Rpc(format!("{method}: {detail}")));
        }
        if !body.contains("<methodResponse>") {
            return Err(ClientError::Protocol(format!(
                "{method}: not an XML-RPC response"
            )));
        }
        Ok(body)
    }

    async fn load(&self, metafile: &str, directory: &str) -> Result<()> {
        let directory = format!("d.directory_base.set={directory}");
        self.call("load.start_verbose", &["", metafile, &directory])
            .await
            .map(|_| ())
    }
}

/// Where the daemon should read the metafile from, and the local copy to
/// remove afterwards, if one was made.
async fn stage_metafile(req: &InjectRequest<'_>) -> Result<(String, Option<PathBuf>)> {
    let seed = req.seed_path;
    let remapped = req.paths.is_remapped() && req.paths.covers(&seed.to_string_lossy());
    if !remapped {
        return Ok((req.metafile_path.to_string_lossy().into_owned(), None));
    }

    let local_dir = seed.parent().unwrap_or(seed);
    let local_copy = local_dir.join(FAST_RESUME_COPY);
    tokio::fs::copy(req.metafile_path, &local_copy).await?;
    log::debug!("Copied fast resume metafile to {:?}", local_copy);

    let remote_dir = parent_dir(&req.paths.to_remote(seed));
    let remote = if remote_dir.ends_with('/') {
        format!("{remote_dir}{FAST_RESUME_COPY}")
    } else {
        format!("{remote_dir}/{FAST_RESUME_COPY}")
    };
    Ok((remote, Some(local_copy)))
}

/// The directory rTorrent should use as the torrent's base: the content
/// itself when it is a directory, its parent for a single file.
fn base_directory(seed: &Path, remote_seed: &str) -> String {
    if seed.is_dir() {
        remote_seed.to_string()
    } else {
        parent_dir(remote_seed)
    }
}

#[async_trait]
impl Adapter for Rtorrent {
    fn kind(&self) -> ClientKind {
        ClientKind::Rtorrent
    }

    async fn inject(&self, req: &InjectRequest<'_>) -> Result<()> {
        let remote_seed = req.paths.to_remote(req.seed_path);
        let directory = base_directory(req.seed_path, &remote_seed);
        let (metafile, local_copy) = stage_metafile(req).await?;
        log::info!("Loading {} into rTorrent at {}", metafile, directory);

        let loaded = self.load(&metafile, &directory).await;
        if let Some(copy) = local_copy {
            if let Err(e) = tokio::fs::remove_file(&copy).await {
                log::warn!("Failed to remove {:?}: {}", copy, e);
            }
        }
        loaded?;

        let label = req
            .overrides
            .label
            .as_deref()
            .or(self.conf.label.as_deref())
            .filter(|l| !l.is_empty());
        if let Some(label) = label {
            tokio::time::sleep(self.settle).await;
            let hash = info_hash::to_hex(req.info_hash, HashCase::Upper);
            self.call("d.custom1.set", &[&hash, label]).await?;
            log::debug!("Set rTorrent label {} on {}", label, hash);
        }
        Ok(())
    }
}

fn xmlrpc_request(method: &str, params: &[&str]) -> String {
    let mut body = String::from(r#"<?xml version="1.0"?><methodCall><methodName>"#);
    body.push_str(method);
    body.push_str("</methodName><params>");
    for param in params {
        body.push_str("<param><value><string>");
        body.push_str(&xml_escape(param));
        body.push_str("</string></value></param>");
    }
    body.push_str("</params></methodCall>");
    body
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn fault_string(body: &str) -> Option<String> {
    FAULT_STRING
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
