//! Finding reusable metafiles among the torrents a client already has.
//!
//! A [`Searcher`] works against a [`TorrentSource`], the read side of a
//! client backend. Candidates are located in the configured storage
//! directory or exported from the client into a scratch directory, then run
//! through [`crate::reuse::validate`].
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_derive::Deserialize;

use crate::conf::ClientConf;
use crate::error::client::Result;
use crate::info_hash;
use crate::MIB;
use crate::metainfo::Metainfo;
use crate::path_map::{self, resolve, ResolvedPaths};
use crate::reuse::{validate, ContentDescriptor, PiecePolicy, ReuseRequest, ReuseVerdict};

pub mod tracker_id;

use self::tracker_id::{TrackerId, TrackerPatterns};

/// Piece length good enough to stop a small piece search early.
pub const SMALL_PIECE_LEN: u64 = 8 * MIB;

/// Trackers whose url starts with one of these are peer discovery
/// mechanisms, not real trackers.
const PSEUDO_TRACKERS: [&str; 3] = ["** [DHT]", "** [PeX]", "** [LSD]"];
/// Tracker status the client reports for a tracker that answered.
const TRACKER_WORKING: i64 = 2;

/// A torrent as listed by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientTorrent {
    pub hash: String,
    pub name: String,
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub content_path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub category: String,
}

/// One tracker of a torrent with the status the client last saw.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerStatus {
    pub url: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub msg: String,
}

impl TrackerStatus {
    pub fn is_pseudo(&self) -> bool {
        PSEUDO_TRACKERS.iter().any(|p| self.url.starts_with(p))
    }

    pub fn is_working(&self) -> bool {
        self.status == TRACKER_WORKING
    }
}

/// The read side of a client that can be searched.
#[async_trait]
pub trait TorrentSource: Send + Sync {
    async fn list_torrents(&self) -> Result<Vec<ClientTorrent>>;

    async fn file_count(&self, hash: &str) -> Result<usize>;

    /// Returns the raw metafile of the torrent with `hash`.
    async fn export_torrent(&self, hash: &str) -> Result<Vec<u8>>;

    async fn trackers(&self, hash: &str) -> Result<Vec<TrackerStatus>>;

    async fn comment(&self, hash: &str) -> Result<Option<String>>;
}

/// A metafile that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReuseMatch {
    pub hash: String,
    /// Where the metafile is on disk.
    pub path: PathBuf,
    pub piece_len: u64,
    /// Site ids found in the metafile's comment. Advisory only.
    pub tracker_ids: Vec<TrackerId>,
}

/// A lookup for a reusable metafile.
#[derive(Debug, Clone, Copy)]
pub struct ExistingRequest<'a> {
    pub content: &'a ContentDescriptor,
    /// Hashes the caller already knows about, tried before any search.
    pub hashes: &'a [String],
    /// Whether the user fixed a maximum piece size, which lifts the size
    /// caps of the small piece policy.
    pub explicit_max_piece_size: bool,
}

/// A client torrent whose data lives exactly at the looked up path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub hash: String,
    pub name: String,
    pub save_path: String,
    pub size: u64,
    pub category: String,
    pub has_working_tracker: bool,
    pub tracker_ids: Vec<TrackerId>,
}

impl PathMatch {
    pub fn has_tracker_id(&self) -> bool {
        !self.tracker_ids.is_empty()
    }
}

pub struct Searcher<'a> {
    conf: &'a ClientConf,
    source: Option<&'a dyn TorrentSource>,
    /// Where exported metafiles are written.
    scratch_dir: PathBuf,
    patterns: TrackerPatterns,
}

impl<'a> Searcher<'a> {
    pub fn new(
        conf: &'a ClientConf,
        source: Option<&'a dyn TorrentSource>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            conf,
            source,
            scratch_dir: scratch_dir.into(),
            patterns: TrackerPatterns::default(),
        }
    }

    pub fn with_patterns(mut self, patterns: TrackerPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    /// The piece policy the client configuration asks for.
    pub fn policy(&self, explicit_max_piece_size: bool) -> PiecePolicy {
        if self.conf.prefer_small_pieces {
            PiecePolicy::PreferSmall {
                explicit_max_piece_size,
            }
        } else {
            PiecePolicy::Default
        }
    }

    /// Finds a metafile that can be reused for the requested content.
    ///
    /// Known hashes are tried first and the first valid one wins. After that
    /// the client's torrent list is searched when the client supports it
    /// and search is enabled.
    pub async fn find_existing(&self, req: &ExistingRequest<'_>) -> Option<ReuseMatch> {
        let paths = resolve(&self.conf.path_maps(), &req.content.path);
        let policy = self.policy(req.explicit_max_piece_size);

        for hash in req.hashes.iter().filter(|h| !h.trim().is_empty()) {
            let Some(candidate) = self.locate(hash).await else {
                continue;
            };
            let verdict = self.check(&candidate, hash, req.content, &paths, policy).await;
            if verdict.valid {
                log::info!("Found a valid metafile for {}", hash);
                return Some(self.matched(hash, verdict).await);
            }
        }

        if self.conf.kind.supports_search() && self.conf.enable_search {
            if let Some(found) = self.search_client(req.content, policy).await {
                return Some(found);
            }
        }
        log::info!("No valid metafile found");
        None
    }

    /// Searches the client's torrent list for a reusable metafile.
    ///
    /// Torrents are considered when their name is the release name, or when
    /// their content path is the content's path as the client sees it. With
    /// the small piece policy the first valid candidate with pieces of at
    /// most [`SMALL_PIECE_LEN`] is returned right away, failing that the one
    /// with the smallest pieces wins; otherwise the first valid one is
    /// returned.
    pub async fn search_client(
        &self,
        content: &ContentDescriptor,
        policy: PiecePolicy,
    ) -> Option<ReuseMatch> {
        let source = self.source?;
        log::info!("Searching client for an existing metafile");

        let torrents = match source.list_torrents().await {
            Ok(torrents) => torrents,
            Err(e) => {
                log::warn!("Error searching client: {}", e);
                return None;
            }
        };

        let paths = resolve(&self.conf.path_maps(), &content.path);
        let remote_content = paths.to_remote(&content.path);
        let single_file = !content.is_disc && content.files.len() == 1;

        let mut matching: Vec<String> = Vec::new();
        for torrent in torrents {
            let by_name = torrent.name == content.release_name;
            let by_path = !torrent.content_path.is_empty()
                && same_path(&torrent.content_path, &remote_content);
            if !by_name && !by_path {
                continue;
            }
            if single_file {
                match source.file_count(&torrent.hash).await {
                    Ok(count) if count == content.files.len() => {}
                    Ok(_) => continue,
                    Err(e) => {
                        log::debug!("Cannot list files of {}: {}", torrent.hash, e);
                        continue;
                    }
                }
            }
            log::trace!("Matched torrent {} ({})", torrent.hash, torrent.name);
            if !matching.contains(&torrent.hash) {
                matching.push(torrent.hash);
            }
        }
        if matching.is_empty() {
            log::info!("No matching torrents found in client");
            return None;
        }
        log::debug!("{} matching torrents", matching.len());

        let prefer_small = matches!(policy, PiecePolicy::PreferSmall { .. });
        let mut best: Option<(String, ReuseVerdict)> = None;
        for hash in matching {
            let Some(candidate) = self.locate(&hash).await else {
                continue;
            };
            let verdict = self.check(&candidate, &hash, content, &paths, policy).await;
            if !verdict.valid {
                continue;
            }
            if !prefer_small {
                log::info!("Returning first valid metafile: {}", hash);
                return Some(self.matched(&hash, verdict).await);
            }
            if verdict.piece_len.map_or(false, |len| len <= SMALL_PIECE_LEN) {
                log::info!("Returning small piece metafile: {}", hash);
                return Some(self.matched(&hash, verdict).await);
            }
            let smaller = best
                .as_ref()
                .map_or(true, |(_, b)| verdict.piece_len < b.piece_len);
            if smaller {
                log::debug!("Updated best match: {} ({:?})", hash, verdict.piece_len);
                best = Some((hash, verdict));
            }
        }

        match best {
            Some((hash, verdict)) => {
                log::info!("Using best match metafile with hash {}", hash);
                Some(self.matched(&hash, verdict).await)
            }
            None => {
                log::info!("No valid metafiles found in client");
                None
            }
        }
    }

    /// Finds the metafile for `hash` on disk, exporting it from the client
    /// when no storage directory is configured.
    pub async fn locate(&self, hash: &str) -> Option<PathBuf> {
        let hash = hash.trim();
        if let Some(dir) = &self.conf.torrent_storage_dir {
            let exact = dir.join(format!("{hash}.torrent"));
            if tokio::fs::try_exists(&exact).await.unwrap_or(false) {
                return Some(exact);
            }
            // session directories may store the hash in either case
            let found = scan_storage_dir(dir, hash).await;
            if found.is_none() {
                log::warn!("Metafile for {} not found in {:?}", hash, dir);
            }
            return found;
        }

        let source = self.source?;
        let bytes = match source.export_torrent(hash).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                log::warn!("Client returned an empty metafile for {}", hash);
                return None;
            }
            Err(e) => {
                log::warn!("Failed to export metafile for {}: {}", hash, e);
                return None;
            }
        };
        let name = info_hash::normalize(hash, self.conf.kind.hash_case());
        let path = self.scratch_dir.join(format!("{name}.torrent"));
        match save_export(&self.scratch_dir, &path, &bytes).await {
            Ok(()) => {
                log::debug!("Saved exported metafile to {:?}", path);
                Some(path)
            }
            Err(e) => {
                log::warn!("Cannot save exported metafile {:?}: {}", path, e);
                None
            }
        }
    }

    /// Lists the client torrents whose data is exactly at `content_path`.
    ///
    /// Torrents whose trackers are all failing are dropped. The rest are
    /// ordered with working trackers first, then those with a recognised
    /// site id in their comment, so the first entry holds the ids worth
    /// reporting.
    pub async fn find_by_content_path(&self, content_path: &Path) -> Result<Vec<PathMatch>> {
        let Some(source) = self.source else {
            return Ok(Vec::new());
        };
        let paths = resolve(&self.conf.path_maps(), content_path);
        let local = content_path.to_string_lossy();
        let remote = paths.to_remote(content_path);
        log::debug!("Looking for torrents with content path {}", local);

        let mut matches = Vec::new();
        for torrent in source.list_torrents().await? {
            let torrent_path = format!("{}/{}", torrent.save_path, torrent.name);
            if !same_path(&torrent_path, &local) && !same_path(&torrent_path, &remote) {
                continue;
            }

            let has_working_tracker = match source.trackers(&torrent.hash).await {
                Ok(trackers) => {
                    let working = trackers
                        .iter()
                        .filter(|t| !t.is_pseudo())
                        .inspect(|t| {
                            if !t.is_working() {
                                log::trace!("Tracker not working: {} {}", t.url, t.msg);
                            }
                        })
                        .any(TrackerStatus::is_working);
                    if !working {
                        log::debug!("Skipping {}: no working trackers", torrent.name);
                        continue;
                    }
                    true
                }
                Err(e) => {
                    log::debug!("Cannot read trackers of {}: {}", torrent.name, e);
                    false
                }
            };

            // the exact path match stands in for the structural check
            let comment = match source.comment(&torrent.hash).await {
                Ok(comment) => comment.unwrap_or_default(),
                Err(e) => {
                    log::debug!("Cannot read properties of {}: {}", torrent.name, e);
                    String::new()
                }
            };
            let tracker_ids = self.patterns.recover(&comment, &torrent.hash);

            matches.push(PathMatch {
                hash: torrent.hash,
                name: torrent.name,
                save_path: torrent.save_path,
                size: torrent.size,
                category: torrent.category,
                has_working_tracker,
                tracker_ids,
            });
        }

        // stable, so client order breaks ties
        matches.sort_by_key(|m| (!m.has_working_tracker, !m.has_tracker_id()));
        if let Some(best) = matches.first() {
            for id in best.tracker_ids.iter() {
                log::info!("Found {} id {} in torrent comment", id.site.to_uppercase(), id.id);
            }
        }
        Ok(matches)
    }

    /// Recovers site ids from the comment and source tag of a validated
    /// metafile.
    pub async fn recover_tracker_ids(&self, metafile: &Path, hash: &str) -> Vec<TrackerId> {
        let metainfo = match Metainfo::from_file(metafile).await {
            Ok(metainfo) => metainfo,
            Err(e) => {
                log::debug!("Cannot read {:?} for tracker ids: {}", metafile, e);
                return Vec::new();
            }
        };
        let mut ids = Vec::new();
        for text in [metainfo.comment.as_deref(), metainfo.source.as_deref()]
            .into_iter()
            .flatten()
        {
            for id in self.patterns.recover(text, hash) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    async fn check(
        &self,
        candidate: &Path,
        hash: &str,
        content: &ContentDescriptor,
        paths: &ResolvedPaths,
        policy: PiecePolicy,
    ) -> ReuseVerdict {
        validate(&ReuseRequest {
            candidate,
            expected_hash: hash,
            client_kind: self.conf.kind,
            content,
            paths,
            policy,
        })
        .await
    }

    async fn matched(&self, hash: &str, verdict: ReuseVerdict) -> ReuseMatch {
        let tracker_ids = self.recover_tracker_ids(&verdict.resolved_path, hash).await;
        ReuseMatch {
            hash: hash.to_string(),
            piece_len: verdict.piece_len.unwrap_or_default(),
            path: verdict.resolved_path,
            tracker_ids,
        }
    }
}

/// Compares two paths after lexical normalization, ignoring case.
fn same_path(a: &str, b: &str) -> bool {
    path_map::normalize(a).to_lowercase() == path_map::normalize(b).to_lowercase()
}

async fn save_export(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, bytes).await
}

async fn scan_storage_dir(dir: &Path, hash: &str) -> Option<PathBuf> {
    let wanted = format!("{hash}.torrent").to_lowercase();
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().to_lowercase() == wanted {
            return Some(entry.path());
        }
    }
    None
}
