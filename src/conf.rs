//! Torrent client configuration.
//!
//! The configuration is plain data deserialized from JSON. A [`Conf`] holds
//! any number of named clients; one of them is the default.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde_derive::{Deserialize, Serialize};

use crate::error::conf::{ConfError, Result};
use crate::info_hash::HashCase;
use crate::search::tracker_id::{TrackerPatternEntry, TrackerPatterns};

/// The name that disables client injection altogether.
pub const NO_CLIENT: &str = "none";

/// The supported torrent client backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// qBittorrent Web API.
    Qbit,
    /// rTorrent XML-RPC.
    Rtorrent,
    /// Deluge daemon RPC.
    Deluge,
    /// Transmission JSON-RPC.
    Transmission,
    /// Copy the metafile into a folder the client watches.
    Watch,
}

impl ClientKind {
    /// The case this client uses for hex info hashes.
    pub fn hash_case(self) -> HashCase {
        match self {
            ClientKind::Qbit | ClientKind::Deluge => HashCase::Lower,
            ClientKind::Rtorrent => HashCase::Upper,
            ClientKind::Transmission | ClientKind::Watch => HashCase::AsGiven,
        }
    }

    /// Whether the client only skips verification when the metafile carries
    /// fast resume data.
    pub fn needs_fast_resume(self) -> bool {
        matches!(self, ClientKind::Rtorrent)
    }

    /// Whether this client's torrent list can be searched for reusable
    /// metafiles.
    pub fn supports_search(self) -> bool {
        matches!(self, ClientKind::Qbit)
    }
}

/// How content is staged into the tracker directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    #[default]
    None,
    Hardlink,
    Symlink,
}

/// A local path prefix and the prefix under which the client daemon sees
/// the same directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMap {
    pub local: String,
    pub remote: String,
}

/// Configuration of a single torrent client instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConf {
    pub kind: ClientKind,

    /// Base url of the control interface, e.g. `http://127.0.0.1` for
    /// qBittorrent or the full XML-RPC endpoint for rTorrent.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    /// Transmission's RPC path.
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,
    /// Target folder for [`ClientKind::Watch`].
    #[serde(default)]
    pub watch_folder: Option<PathBuf>,

    /// Local to remote path pairs, most specific first.
    #[serde(default)]
    pub path_maps: Vec<PathMap>,

    #[serde(default)]
    pub linking: LinkMode,
    /// Candidate directories for staged links.
    #[serde(default)]
    pub linked_folders: Vec<PathBuf>,

    /// Directory holding `<infohash>.torrent` files of the client's torrents.
    #[serde(default)]
    pub torrent_storage_dir: Option<PathBuf>,
    #[serde(default)]
    pub enable_search: bool,
    #[serde(default)]
    pub prefer_small_pieces: bool,

    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub use_tracker_as_tag: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_content_layout")]
    pub content_layout: String,
    /// Save paths under any of these roots get automatic torrent management.
    #[serde(default)]
    pub automatic_management_paths: Vec<String>,

    /// How long to wait for an added torrent to show up in the client.
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    /// Per request timeout for control interface calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_rpc_path() -> String {
    "/transmission/rpc".to_string()
}

fn default_content_layout() -> String {
    "Original".to_string()
}

fn default_confirm_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    10
}

impl ClientConf {
    /// Returns the configured path pairs, or the placeholder pair when none
    /// are configured.
    pub fn path_maps(&self) -> Vec<PathMap> {
        if self.path_maps.is_empty() {
            vec![PathMap {
                local: "/LocalPath".to_string(),
                remote: "/RemotePath".to_string(),
            }]
        } else {
            self.path_maps.clone()
        }
    }

    /// The control interface base url with the port applied.
    pub fn endpoint(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        let url = if url.is_empty() {
            "http://127.0.0.1"
        } else {
            url
        };
        match self.port {
            Some(port) if !has_port(url) => format!("{url}:{port}"),
            _ => url.to_string(),
        }
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn has_port(url: &str) -> bool {
    let authority = url.split("://").nth(1).unwrap_or(url);
    let host = authority.split('/').next().unwrap_or(authority);
    // ipv6 literals contain colons of their own
    match host.rfind(']') {
        Some(end) => host[end..].contains(':'),
        None => host.contains(':'),
    }
}

/// The full set of configured clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conf {
    pub default_client: String,
    #[serde(default)]
    pub clients: HashMap<String, ClientConf>,
    /// Extra tracker comment patterns, tried after the built in ones.
    #[serde(default)]
    pub tracker_patterns: Vec<TrackerPatternEntry>,
}

impl Conf {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        log::debug!("Loaded client configuration from {}", path.display());
        Self::from_json_str(&content)
    }

    /// Picks the named client, or the default one when `name` is `None`.
    ///
    /// Returns `Ok(None)` when injection is disabled by naming [`NO_CLIENT`].
    pub fn client(&self, name: Option<&str>) -> Result<Option<&ClientConf>> {
        let name = name.unwrap_or(&self.default_client);
        if name == NO_CLIENT {
            return Ok(None);
        }
        self.clients
            .get(name)
            .map(Some)
            .ok_or_else(|| ConfError::UnknownClient(name.to_string()))
    }

    /// The built in tracker patterns extended with the configured ones.
    pub fn tracker_patterns(&self) -> Result<TrackerPatterns> {
        TrackerPatterns::with_extra(self.tracker_patterns.clone())
    }
}
