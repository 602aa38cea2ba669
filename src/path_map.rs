//! Translation between the paths we see and the paths the client daemon sees.
//!
//! A client may run in a container or on another host that mounts the same
//! storage under a different prefix. Every path handed to a client backend
//! goes through the pair picked by [`resolve`].
use std::path::{Component, Path, PathBuf};

use crate::conf::PathMap;

/// The local and remote prefix chosen for one content path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub local: String,
    pub remote: String,
}

/// Picks the most specific pair whose local prefix occurs in `content_path`,
/// ignoring case. Falls back to the first pair when none matches.
///
/// # Panics
///
/// Panics if `maps` is empty; [`crate::conf::ClientConf::path_maps`] never
/// returns an empty list.
pub fn resolve(maps: &[PathMap], content_path: &Path) -> ResolvedPaths {
    assert!(!maps.is_empty(), "path map list must not be empty");
    let content = content_path.to_string_lossy().to_ascii_lowercase();

    let mut best: Option<&PathMap> = None;
    for map in maps {
        let local = normalize(&map.local).to_ascii_lowercase();
        if !content.contains(&local) {
            continue;
        }
        // earlier entries win ties, the list is ordered by specificity
        if best.map_or(true, |b| normalize(&b.local).len() < local.len()) {
            best = Some(map);
        }
    }
    let map = best.unwrap_or(&maps[0]);
    log::trace!(
        "Resolved path map for {:?}: {} -> {}",
        content_path,
        map.local,
        map.remote
    );

    let local = normalize(&map.local);
    let mut remote = normalize(&map.remote);
    // a bare root keeps its separator on both sides
    if local.ends_with('/') && !remote.ends_with('/') {
        remote.push('/');
    }
    ResolvedPaths { local, remote }
}

impl ResolvedPaths {
    /// Whether the two prefixes actually differ.
    pub fn is_remapped(&self) -> bool {
        self.local.to_ascii_lowercase() != self.remote.to_ascii_lowercase()
    }

    /// Whether `path` lies under the local prefix, ignoring case.
    pub fn covers(&self, path: &str) -> bool {
        path.to_ascii_lowercase().contains(&self.local.to_ascii_lowercase())
    }

    /// Rewrites a local path into the client's view of it.
    ///
    /// A path starting with the local prefix gets the remote prefix in its
    /// place. Otherwise the first occurrence of the local prefix anywhere in
    /// the path is replaced. Separators are always `/` in the result of a
    /// remapped path.
    pub fn to_remote(&self, path: &Path) -> String {
        let path = path.to_string_lossy();
        if !self.is_remapped() {
            return path.into_owned();
        }

        let norm_path = normalize(&path);
        let lowered = norm_path.to_ascii_lowercase();
        let local = self.local.to_ascii_lowercase();
        let remote = self.remote.trim_end_matches('/');

        if lowered.starts_with(&local) {
            let rest = &norm_path[local.len()..];
            // only a whole component counts as a prefix match
            if local.ends_with('/') || rest.is_empty() || rest.starts_with('/') {
                let rest = rest.trim_start_matches('/');
                return if rest.is_empty() {
                    self.remote.replace('\\', "/")
                } else {
                    format!("{remote}/{rest}").replace('\\', "/")
                };
            }
        }

        match lowered.find(&local) {
            Some(start) => {
                let mut out = String::with_capacity(norm_path.len());
                out.push_str(&norm_path[..start]);
                out.push_str(&self.remote);
                out.push_str(&norm_path[start + local.len()..]);
                out.replace('\\', "/")
            }
            None => path.replace('\\', "/"),
        }
    }
}

/// Lexically normalizes a path string: repeated separators, `.` components
/// and trailing separators are dropped, `..` pops a component.
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    let out = out.to_string_lossy().into_owned();
    if out.is_empty() {
        ".".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn maps(pairs: &[(&str, &str)]) -> Vec<PathMap> {
        pairs
            .iter()
            .map(|(local, remote)| PathMap {
                local: local.to_string(),
                remote: remote.to_string(),
            })
            .collect()
    }

    #[test]
    fn should_pick_most_specific_match() {
        let maps = maps(&[("/data", "/mnt/data"), ("/data/movies", "/movies")]);
        let resolved = resolve(&maps, Path::new("/data/movies/X"));
        assert_eq!(resolved.local, "/data/movies");
        assert_eq!(resolved.remote, "/movies");
    }

    #[test]
    fn should_match_ignoring_case() {
        let maps = maps(&[("/other", "/o"), ("/Data/", "/mnt/data/")]);
        let resolved = resolve(&maps, Path::new("/data/movies/X"));
        assert_eq!(resolved.local, "/Data");
        assert_eq!(resolved.remote, "/mnt/data");
    }

    #[test]
    fn should_fall_back_to_first_pair() {
        let maps = maps(&[("/a", "/b"), ("/c", "/d")]);
        let resolved = resolve(&maps, Path::new("/data/file.mkv"));
        assert_eq!(resolved.local, "/a");
    }

    #[test]
    fn should_translate_prefix_to_remote() {
        let resolved = resolve(&maps(&[("/data", "/mnt/data")]), Path::new("/data/x"));
        assert!(resolved.is_remapped());
        assert_eq!(
            resolved.to_remote(Path::new("/data/movies/X")),
            "/mnt/data/movies/X"
        );
        assert_eq!(resolved.to_remote(Path::new("/data")), "/mnt/data");
        // not a component boundary, falls back to a plain replacement
        assert_eq!(
            resolved.to_remote(Path::new("/database/x")),
            "/mnt/database/x"
        );
    }

    #[test]
    fn should_translate_paths_with_non_ascii_components() {
        let resolved = resolve(&maps(&[("/data", "/mnt/data")]), Path::new("/data/x"));
        // KELVIN SIGN lowers to a shorter ascii 'k'
        assert_eq!(
            resolved.to_remote(Path::new("/\u{212A}/data/x")),
            "/\u{212A}/mnt/data/x"
        );
        assert_eq!(
            resolved.to_remote(Path::new("/data/\u{130}stanbul \u{2126}/x")),
            "/mnt/data/\u{130}stanbul \u{2126}/x"
        );
        assert!(resolved.covers("/\u{23A}/DATA/x"));

        let resolved = resolve(
            &maps(&[("/\u{212A}", "/k"), ("/\u{212A}/data", "/mnt/data")]),
            Path::new("/\u{212A}/data/x"),
        );
        assert_eq!(resolved.remote, "/mnt/data");
    }

    #[test]
    fn should_keep_path_when_not_remapped() {
        let resolved = resolve(&maps(&[("/data", "/DATA")]), Path::new("/data/x"));
        assert!(!resolved.is_remapped());
        assert_eq!(resolved.to_remote(Path::new("/data/x")), "/data/x");
    }

    #[test]
    fn should_normalize_lexically() {
        assert_eq!(normalize("/data//movies/./X/"), "/data/movies/X");
        assert_eq!(normalize("/data/movies/../tv"), "/data/tv");
        assert_eq!(normalize("/"), "/");
    }
}
