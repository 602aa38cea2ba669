//! Fast resume data for clients that would otherwise re-check the data.
//!
//! rTorrent reads a `libtorrent_resume` dictionary from the metafile it is
//! given. When it holds a complete bitfield and, per file, the modification
//! time and the number of pieces the file completes, the client trusts the
//! data without hashing it.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde_bencode::value::Value;

use crate::error::metainfo::MetainfoError;
pub use crate::error::resume::Result;
use crate::error::resume::ResumeError;
use crate::metainfo::Metainfo;
use crate::RESUME_KEY;

/// Adds resume data for the content at `content_path` to `metafile`.
///
/// `content_path` is the directory holding the files of a multi file
/// torrent, or the file of a single file torrent. A directory is accepted
/// for a single file torrent too, the file is then looked up by the
/// torrent's name inside it.
///
/// Every file on disk must have exactly the length the metafile records.
pub fn augment(metafile: &[u8], content_path: &Path) -> Result<Vec<u8>> {
    let metainfo = Metainfo::from_bytes(metafile)?;
    let Value::Dict(mut root) = serde_bencode::from_bytes::<Value>(metafile)? else {
        return Err(MetainfoError::InvalidMetainfo.into());
    };

    let mut files = Vec::with_capacity(metainfo.files.len());
    for file in metainfo.files.iter() {
        let path = if metainfo.is_multi_file {
            content_path.join(&file.path)
        } else if content_path.is_dir() {
            content_path.join(&metainfo.name)
        } else {
            content_path.to_path_buf()
        };

        let meta = std::fs::metadata(&path)?;
        if meta.len() != file.len {
            log::error!("Cannot build fast resume data for {:?}", path);
            return Err(ResumeError::SizeMismatch {
                path,
                actual: meta.len(),
                expected: file.len,
            });
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);

        let mut entry = HashMap::new();
        entry.insert(b"priority".to_vec(), Value::Int(1));
        entry.insert(b"mtime".to_vec(), Value::Int(mtime));
        entry.insert(
            b"completed".to_vec(),
            Value::Int(file.piece_span(metainfo.piece_len) as i64),
        );
        files.push(Value::Dict(entry));
    }

    let mut resume = match root.remove(RESUME_KEY.as_bytes()) {
        Some(Value::Dict(resume)) => resume,
        _ => HashMap::new(),
    };
    resume.insert(
        b"bitfield".to_vec(),
        Value::Int(metainfo.piece_count as i64),
    );
    resume.insert(b"files".to_vec(), Value::List(files));
    root.insert(RESUME_KEY.as_bytes().to_vec(), Value::Dict(resume));

    log::debug!(
        "Added fast resume data for {} files of {}",
        metainfo.files.len(),
        metainfo.name
    );
    Ok(serde_bencode::to_bytes(&Value::Dict(root))?)
}

/// Where the resume augmented copy of `metafile_path` is written:
/// `x.torrent` becomes `x-resume.torrent`.
pub fn side_file_path(metafile_path: &Path) -> PathBuf {
    let stem = metafile_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    metafile_path.with_file_name(format!("{stem}-resume.torrent"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::fixture::MetafileBuilder;

    fn resume_of(bytes: &[u8]) -> HashMap<Vec<u8>, Value> {
        let Value::Dict(mut root) = serde_bencode::from_bytes::<Value>(bytes).unwrap() else {
            panic!("metafile is not a dictionary");
        };
        match root.remove(RESUME_KEY.as_bytes()) {
            Some(Value::Dict(resume)) => resume,
            other => panic!("unexpected resume value {other:?}"),
        }
    }

    fn completed(resume: &HashMap<Vec<u8>, Value>) -> Vec<i64> {
        let Some(Value::List(files)) = resume.get(b"files".as_slice()) else {
            panic!("no files list");
        };
        files
            .iter()
            .map(|f| match f {
                Value::Dict(d) => match d.get(b"completed".as_slice()) {
                    Some(Value::Int(n)) => *n,
                    _ => panic!("no completed count"),
                },
                _ => panic!("file entry is not a dictionary"),
            })
            .collect()
    }

    #[test]
    fn should_add_resume_data_for_exact_sizes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Release");
        std::fs::create_dir_all(root.join("Subs")).unwrap();
        std::fs::write(root.join("a.mkv"), vec![0; 100]).unwrap();
        std::fs::write(root.join("Subs/b.srt"), vec![0; 30]).unwrap();
        let metafile = MetafileBuilder::multi("Release", &[("a.mkv", 100), ("Subs/b.srt", 30)])
            .piece_len(64)
            .build();

        let augmented = augment(&metafile, &root).unwrap();
        let resume = resume_of(&augmented);
        assert_eq!(resume.get(b"bitfield".as_slice()), Some(&Value::Int(3)));
        // a.mkv covers pieces 0-1, b.srt shares piece 1 and ends in piece 2
        assert_eq!(completed(&resume), vec![2, 2]);

        // the info dictionary is untouched
        let before = Metainfo::from_bytes(&metafile).unwrap();
        let after = Metainfo::from_bytes(&augmented).unwrap();
        assert_eq!(before.info_hash, after.info_hash);
    }

    #[test]
    fn should_reject_off_by_one_sizes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Release");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.mkv"), vec![0; 100]).unwrap();
        std::fs::write(root.join("b.mkv"), vec![0; 50]).unwrap();

        for (a, b) in [(101, 50), (100, 49)] {
            let metafile = MetafileBuilder::multi("Release", &[("a.mkv", a), ("b.mkv", b)]).build();
            let err = augment(&metafile, &root).unwrap_err();
            assert!(
                matches!(err, ResumeError::SizeMismatch { .. }),
                "unexpected error {err}"
            );
        }
    }

    #[test]
    fn should_find_single_file_inside_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("movie.mkv"), vec![0; 10]).unwrap();
        let metafile = MetafileBuilder::single("movie.mkv", 10).build();

        let from_dir = augment(&metafile, dir.path()).unwrap();
        let from_file = augment(&metafile, &dir.path().join("movie.mkv")).unwrap();
        assert_eq!(from_dir, from_file);
        assert_eq!(completed(&resume_of(&from_dir)), vec![1]);
    }

    #[test]
    fn should_fail_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let metafile = MetafileBuilder::single("movie.mkv", 10).build();
        let err = augment(&metafile, &dir.path().join("movie.mkv")).unwrap_err();
        assert!(matches!(err, ResumeError::Io(_)));
    }

    #[test]
    fn should_name_side_file_after_metafile() {
        assert_eq!(
            side_file_path(Path::new("/tmp/run/[AITHER].torrent")),
            PathBuf::from("/tmp/run/[AITHER]-resume.torrent")
        );
    }
}
