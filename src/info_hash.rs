//! Hex form of info hashes.
//!
//! Clients disagree on the case of the hex digest: rTorrent names its
//! session files and reports hashes in upper case, qBittorrent and Deluge
//! in lower case. Every hash that crosses a client boundary goes through
//! [`normalize`] with the client's [`HashCase`].
use std::path::{Path, PathBuf};

use crate::Sha1Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashCase {
    Upper,
    Lower,
    /// The client accepts either; keep whatever the caller gave.
    AsGiven,
}

/// Trims the hash and applies `case`.
pub fn normalize(hash: &str, case: HashCase) -> String {
    let hash = hash.trim();
    match case {
        HashCase::Upper => hash.to_ascii_uppercase(),
        HashCase::Lower => hash.to_ascii_lowercase(),
        HashCase::AsGiven => hash.to_string(),
    }
}

pub fn to_hex(hash: &Sha1Hash, case: HashCase) -> String {
    match case {
        HashCase::Upper => hex::encode_upper(hash),
        HashCase::Lower | HashCase::AsGiven => hex::encode(hash),
    }
}

/// Replaces every occurrence of `hash` in `path`, in any case, with the
/// already normalized form.
///
/// Metafile names in a storage directory embed the hash, and the case on
/// disk has to be the client's.
pub fn substitute_in_path(path: &Path, normalized: &str) -> PathBuf {
    if normalized.is_empty() {
        return path.to_path_buf();
    }
    let original = path.to_string_lossy();
    // ascii lowering keeps byte offsets identical
    let lowered = original.to_ascii_lowercase();
    let needle = normalized.to_ascii_lowercase();

    let mut out = String::with_capacity(original.len());
    let mut last = 0;
    for (start, _) in lowered.match_indices(&needle) {
        out.push_str(&original[last..start]);
        out.push_str(normalized);
        last = start + needle.len();
    }
    out.push_str(&original[last..]);
    PathBuf::from(out)
}
