//! Decides whether an existing metafile can be reused for content on disk.
//!
//! Validation runs in two stages. The structural stage compares the
//! metafile's file layout with the content. Only a structurally matching
//! metafile reaches the piece geometry stage, so a metafile with the wrong
//! files is never accepted no matter how good its pieces look.
use std::path::{Component, Path, PathBuf};

use crate::conf::ClientKind;
use crate::info_hash;
use crate::metainfo::Metainfo;
use crate::path_map::ResolvedPaths;
use crate::MIB;


/// Piece count at or above which the piece size must be at least 8 MiB.
const MAX_PIECES_BELOW_8MIB: usize = 8000;
/// Piece count at or above which the piece size must be at least 4 MiB.
const MAX_PIECES_BELOW_4MIB: usize = 5000;
/// Piece count limit when small pieces are preferred.
const MAX_PIECES_SMALL: usize = 12000;
/// The smallest piece size worth reusing.
const MIN_PIECE_LEN: u64 = 32 * 1024;
/// The largest metafile worth reusing when small pieces are preferred.
const MAX_METAFILE_KIB: f64 = 250.0;

/// The content we intend to seed, derived from the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    /// The content's root: the file itself or the release directory.
    pub path: PathBuf,
    /// The release identifier, which is also the expected torrent name.
    pub release_name: String,
    /// Absolute paths of the files that make up the release.
    pub files: Vec<PathBuf>,
    /// Disc structures (BDMV, VIDEO_TS) are always reused as a folder.
    pub is_disc: bool,
    /// Keep the release directory even for a single file.
    pub keep_folder: bool,
    pub is_dir: bool,
}

/// The layout a reusable metafile must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedLayout {
    /// A whole folder, matched by name.
    Folder,
    SingleFile,
    MultiFile,
}

impl ContentDescriptor {
    /// Describes `path`, listing every regular file below it when it is a
    /// directory.
    pub fn scan(path: &Path, release_name: &str) -> std::io::Result<Self> {
        let is_dir = std::fs::metadata(path)?.is_dir();
        let mut files = Vec::new();
        if is_dir {
            for entry in walkdir::WalkDir::new(path).sort_by_file_name() {
                let entry = entry.map_err(std::io::Error::from)?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.to_path_buf());
        }
        Ok(Self {
            path: path.to_path_buf(),
            release_name: release_name.to_string(),
            files,
            is_disc: false,
            keep_folder: false,
            is_dir,
        })
    }

    pub fn layout(&self) -> ExpectedLayout {
        if self.is_disc || (self.keep_folder && self.is_dir) {
            ExpectedLayout::Folder
        } else if self.files.len() == 1 {
            ExpectedLayout::SingleFile
        } else {
            ExpectedLayout::MultiFile
        }
    }

    /// The path to stage and hand to clients: the single file itself unless
    /// the folder is kept, the content root otherwise.
    pub fn source_path(&self) -> &Path {
        match self.files.as_slice() {
            [only] if !self.keep_folder && only.is_file() => only,
            _ => &self.path,
        }
    }
}

/// Which piece geometry is acceptable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PiecePolicy {
    /// Cap the piece count for small piece sizes.
    #[default]
    Default,
    /// Accept small pieces as long as the metafile stays small. An explicit
    /// maximum piece size from the user lifts the count and file size caps.
    PreferSmall { explicit_max_piece_size: bool },
}

/// Why a verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseReason {
    Valid,
    /// No metafile at the candidate path.
    NotFound,
    Unreadable,
    StructuralMismatch,
    /// The single recorded file is nested inside a folder.
    WrongFile,
    PieceGeometryRejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReuseVerdict {
    pub valid: bool,
    pub reason: ReuseReason,
    /// The candidate path after hash case normalization.
    pub resolved_path: PathBuf,
    /// Piece length of the candidate when it could be read.
    pub piece_len: Option<u64>,
}

impl ReuseVerdict {
    fn reject(reason: ReuseReason, resolved_path: PathBuf, piece_len: Option<u64>) -> Self {
        Self {
            valid: false,
            reason,
            resolved_path,
            piece_len,
        }
    }

    /// Whether the candidate's file layout matched the content, regardless
    /// of its piece geometry.
    pub fn is_structural_match(&self) -> bool {
        matches!(
            self.reason,
            ReuseReason::Valid | ReuseReason::PieceGeometryRejected
        )
    }
}

/// Everything [`validate`] reads.
#[derive(Debug, Clone, Copy)]
pub struct ReuseRequest<'a> {
    pub candidate: &'a Path,
    pub expected_hash: &'a str,
    pub client_kind: ClientKind,
    pub content: &'a ContentDescriptor,
    pub paths: &'a ResolvedPaths,
    pub policy: PiecePolicy,
}

/// Validates a candidate metafile against the content.
pub async fn validate(req: &ReuseRequest<'_>) -> ReuseVerdict {
    let hash = info_hash::normalize(req.expected_hash, req.client_kind.hash_case());
    let resolved_path = info_hash::substitute_in_path(req.candidate, &hash);
    log::trace!("Candidate metafile after normalization: {:?}", resolved_path);

    let bytes = match tokio::fs::read(&resolved_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("{:?} was not found", resolved_path);
            return ReuseVerdict::reject(ReuseReason::NotFound, resolved_path, None);
        }
        Err(e) => {
            log::warn!("Cannot read metafile {:?}: {}", resolved_path, e);
            return ReuseVerdict::reject(ReuseReason::Unreadable, resolved_path, None);
        }
    };
    let metainfo = match Metainfo::from_bytes(&bytes) {
        Ok(metainfo) => metainfo,
        Err(e) => {
            log::warn!("Error reading metafile {:?}: {}", resolved_path, e);
            return ReuseVerdict::reject(ReuseReason::Unreadable, resolved_path, None);
        }
    };
    let piece_len = Some(metainfo.piece_len);

    match structural_match(&metainfo, req.content, req.paths) {
        Structure::Match => {}
        Structure::WrongFile => {
            log::info!("Provided metafile has files that were not expected");
            return ReuseVerdict::reject(ReuseReason::WrongFile, resolved_path, piece_len);
        }
        Structure::Mismatch => {
            log::info!("Unwanted files or folders identified in {:?}", resolved_path);
            return ReuseVerdict::reject(
                ReuseReason::StructuralMismatch,
                resolved_path,
                piece_len,
            );
        }
    }

    if let Err(why) = check_geometry(&metainfo, req.policy) {
        log::info!("Not reusing {}: {}", hash, why);
        return ReuseVerdict::reject(ReuseReason::PieceGeometryRejected, resolved_path, piece_len);
    }

    log::info!(
        "Reusing metafile with infohash {} ({} pieces of {} KiB)",
        hash,
        metainfo.piece_count,
        metainfo.piece_len / 1024
    );
    ReuseVerdict {
        valid: true,
        reason: ReuseReason::Valid,
        resolved_path,
        piece_len,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Structure {
    Match,
    Mismatch,
    WrongFile,
}

fn structural_match(
    metainfo: &Metainfo,
    content: &ContentDescriptor,
    paths: &ResolvedPaths,
) -> Structure {
    let recorded = metainfo.recorded_paths();

    match content.layout() {
        ExpectedLayout::Folder => {
            if metainfo.name != content.release_name {
                log::debug!(
                    "Modified file structure: torrent name {:?} is not {:?}",
                    metainfo.name,
                    content.release_name
                );
                return Structure::Mismatch;
            }
            let prefix = common_path(&recorded);
            match content.path.file_name() {
                Some(base) if contains_components(&prefix, Path::new(base)) => Structure::Match,
                _ => Structure::Mismatch,
            }
        }
        ExpectedLayout::SingleFile => {
            let [file] = recorded.as_slice() else {
                return Structure::Mismatch;
            };
            if file.file_name() != content.files[0].file_name() {
                return Structure::Mismatch;
            }
            // the file has to sit at the top, not inside a folder
            if file.components().count() == 1 {
                Structure::Match
            } else {
                Structure::WrongFile
            }
        }
        ExpectedLayout::MultiFile => {
            if recorded.len() != content.files.len() {
                return Structure::Mismatch;
            }
            let torrent_prefix = common_path(&recorded);
            let mut actual_prefix = common_path(&content.files);
            if paths.is_remapped() && paths.covers(&content.path.to_string_lossy()) {
                actual_prefix = PathBuf::from(paths.to_remote(&actual_prefix));
            }
            log::debug!(
                "Torrent prefix {:?}, actual prefix {:?}",
                torrent_prefix,
                actual_prefix
            );
            if contains_components(&actual_prefix, &torrent_prefix) {
                Structure::Match
            } else {
                Structure::Mismatch
            }
        }
    }
}

fn check_geometry(metainfo: &Metainfo, policy: PiecePolicy) -> Result<(), String> {
    let pieces = metainfo.piece_count;
    let piece_len = metainfo.piece_len;
    match policy {
        PiecePolicy::Default => {
            if pieces >= MAX_PIECES_BELOW_8MIB && piece_len < 8 * MIB {
                return Err(format!(
                    "needs fewer than {MAX_PIECES_BELOW_8MIB} pieces below 8 MiB, has {pieces}"
                ));
            }
            if pieces >= MAX_PIECES_BELOW_4MIB && piece_len < 4 * MIB {
                return Err(format!(
                    "needs fewer than {MAX_PIECES_BELOW_4MIB} pieces below 4 MiB, has {pieces}"
                ));
            }
        }
        PiecePolicy::PreferSmall {
            explicit_max_piece_size,
        } => {
            if !explicit_max_piece_size && pieces >= MAX_PIECES_SMALL {
                return Err(format!(
                    "needs fewer than {MAX_PIECES_SMALL} pieces, has {pieces}"
                ));
            }
            if piece_len < MIN_PIECE_LEN {
                return Err(format!("piece size {piece_len} is too small"));
            }
            let kib = metainfo.encoded_len as f64 / 1024.0;
            if !explicit_max_piece_size && kib > MAX_METAFILE_KIB {
                return Err(format!("metafile is {kib:.2} KiB"));
            }
        }
    }
    Ok(())
}

/// The longest shared leading component sequence of `paths`.
pub(crate) fn common_path(paths: &[PathBuf]) -> PathBuf {
    let Some((first, rest)) = paths.split_first() else {
        return PathBuf::new();
    };
    let mut common: Vec<Component> = first.components().collect();
    for path in rest {
        let shared = common
            .iter()
            .zip(path.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        common.truncate(shared);
    }
    common.iter().collect()
}

/// Whether the components of `needle` occur as a contiguous run in
/// `haystack`.
fn contains_components(haystack: &Path, needle: &Path) -> bool {
    let haystack: Vec<_> = haystack.components().collect();
    let needle: Vec<_> = needle.components().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle.as_slice())
}
