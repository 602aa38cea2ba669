use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

pub use crate::error::metainfo::Result;
use crate::error::metainfo::MetainfoError;
use crate::info_hash::{self, HashCase};
use crate::storage_info::FileInfo;
use crate::Sha1Hash;

/// The meta info from torrent file.
#[derive(Clone)]
pub struct Metainfo {
    /// torrent name, the form for download path.
    pub name: String,
    /// 20 bytes of SHA-1 over the bencoded `info` dictionary.
    pub info_hash: Sha1Hash,
    /// The number of 20 byte piece hashes in `pieces`.
    pub piece_count: usize,
    /// the length of the pieces
    pub piece_len: u64,
    /// Files in torrent order. For a multi file torrent the paths are
    /// relative to the torrent's root directory (which is `name`).
    pub files: Vec<FileInfo>,
    /// Whether the metafile uses the `files` list rather than a single
    /// `length`. A multi file torrent may still hold just one file.
    pub is_multi_file: bool,
    /// The trackers that we can announce to.
    pub trackers: Vec<Url>,
    /// Free form comment, usually the tracker's details page.
    pub comment: Option<String>,
    /// The `info.source` tag some trackers stamp into their metafiles.
    pub source: Option<String>,
    /// Size of the encoded metafile in bytes.
    pub encoded_len: usize,
}

impl fmt::Debug for Metainfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metainfo")
            .field("name", &self.name)
            .field("info_hash", &self.info_hash_hex(HashCase::Lower))
            .field("piece_count", &self.piece_count)
            .field("piece_len", &self.piece_len)
            .field("structure", &self.files)
            .finish()
    }
}

impl Metainfo {
    /// Parse from a byte buffer to crate a [`Metainfo`] instance
    /// or return a Error about the invalid format, syntax or which come from `serde_bencode`
    ///
    /// Here are some rules:
    /// - the bencode format and syntax should correct.
    /// - the length of pieces in info should be the multiple of 20.
    /// - cannot not contain both `length` (single file) and `files` (multi files).
    /// - If having multi files, the `files` should not be empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let metainfo: raw::Metainfo = serde_bencode::from_bytes(bytes)?;

        // the pieces field is a concatenation of 20 byte SHA-1 hashes, so it
        // must be a multiple of 20
        if metainfo.info.pieces.len() % 20 != 0 {
            return Err(MetainfoError::InvalidPieces);
        }
        if metainfo.info.piece_len == 0 {
            log::warn!("Piece length is 0");
            return Err(MetainfoError::InvalidMetainfo);
        }

        // verify download structure and build up files metadata
        let mut files = Vec::new();
        let is_multi_file;
        if let Some(len) = metainfo.info.len {
            if metainfo.info.files.is_some() {
                log::warn!("Metainfo cannot contain both `length` and `files`");
                return Err(MetainfoError::InvalidMetainfo);
            }
            is_multi_file = false;

            // the path of this file is just the torrent name
            files.push(FileInfo {
                path: metainfo.info.name.clone().into(),
                len,
                torrent_offset: 0,
            });
        } else if let Some(raw_files) = &metainfo.info.files {
            if raw_files.is_empty() {
                log::warn!("Metainfo files must not be empty");
                return Err(MetainfoError::InvalidMetainfo);
            }
            is_multi_file = true;

            files.reserve_exact(raw_files.len());

            // the offset of series of files
            let mut torrent_offset = 0;
            for file in raw_files.iter() {
                // verify that the path is not empty
                let path: PathBuf = file.path.iter().collect();
                if path.as_os_str().is_empty() {
                    log::warn!("Path in metainfo is empty");
                    return Err(MetainfoError::InvalidMetainfo);
                }

                // verify that the path is not absolute
                if path.is_absolute() {
                    log::warn!("Path {:?} is absolute", path);
                    return Err(MetainfoError::InvalidMetainfo);
                }

                files.push(FileInfo {
                    path,
                    torrent_offset,
                    len: file.len,
                });

                // advance offset for next file
                torrent_offset += file.len;
            }
        } else {
            log::warn!("No `length` or `files` key present in metainfo");
            return Err(MetainfoError::InvalidMetainfo);
        }

        let mut trackers = Vec::new();
        let announces = metainfo
            .announce_list
            .iter()
            .flatten()
            .chain(metainfo.announce.iter());
        for tracker in announces {
            // an unparsable announce url does not make the layout unusable
            match Url::parse(tracker) {
                Ok(url) if !trackers.contains(&url) => trackers.push(url),
                Ok(_) => {}
                Err(e) => log::debug!("Skipping tracker {:?}: {}", tracker, e),
            }
        }

        let info_hash = raw::info_hash(bytes)?;

        Ok(Metainfo {
            name: metainfo.info.name,
            info_hash,
            piece_count: metainfo.info.pieces.len() / 20,
            piece_len: metainfo.info.piece_len,
            files,
            is_multi_file,
            trackers,
            comment: metainfo.comment,
            source: metainfo.info.source,
            encoded_len: bytes.len(),
        })
    }

    /// Reads and parses the metafile at `path`.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_bytes(&bytes)
    }

    /// Return true if the download multi files
    pub fn is_archive(&self) -> bool {
        self.files.len() > 1
    }

    /// The sum of all file lengths.
    pub fn total_len(&self) -> u64 {
        self.files.iter().map(|f| f.len).sum()
    }

    /// File paths as a client lays them out under its save directory: the
    /// bare name for a single file torrent, `name/...` otherwise.
    pub fn recorded_paths(&self) -> Vec<PathBuf> {
        if self.is_multi_file {
            self.files
                .iter()
                .map(|f| Path::new(&self.name).join(&f.path))
                .collect()
        } else {
            self.files.iter().map(|f| f.path.clone()).collect()
        }
    }

    pub fn info_hash_hex(&self, case: HashCase) -> String {
        info_hash::to_hex(&self.info_hash, case)
    }
}

pub(crate) mod raw {
    //! Only for `bencode` crate deserialize to
    //! convert into [`super::Metainfo`]
    use serde_bencode::value::Value;
    use serde_derive::{Deserialize, Serialize};
    use sha1::Digest;

    use super::Result;
    use crate::Sha1Hash;

    /// Details field meaning in [.torrent file](https://en.wikipedia.org/wiki/Torrent_file)
    #[derive(Debug, Deserialize)]
    pub struct Metainfo {
        /// this maps to a dictionary whose keys are dependent on whether one or more files are being shared
        pub info: Info,
        /// the URL of the tracker
        pub announce: Option<String>,
        #[serde(default)]
        #[serde(rename = "announce-list")]
        pub announce_list: Vec<Vec<String>>,
        pub comment: Option<String>,
    }

    /// Only the `info` dictionary, kept as a generic value so that keys
    /// unknown to [`Info`] still take part in the info hash.
    #[derive(Debug, Deserialize)]
    struct InfoOnly {
        info: Value,
    }

    /// Hashes the `info` dictionary of an encoded metafile.
    ///
    /// Dictionaries are re-encoded with sorted keys, which reproduces the
    /// original bytes for any canonically encoded metafile.
    pub fn info_hash(bytes: &[u8]) -> Result<Sha1Hash> {
        let InfoOnly { info } = serde_bencode::from_bytes(bytes)?;
        let info = serde_bencode::to_bytes(&info)?;
        let digest = sha1::Sha1::digest(&info);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&digest);
        Ok(info_hash)
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Info {
        /// suggested filename where the file is to be saved (if one file)/suggested directory name
        /// where the files are to be saved (if multiple files)
        pub name: String,
        #[serde(with = "serde_bytes")]
        /// a hash list, i.e., a concatenation of each piece's SHA-1 hash. As SHA-1 returns a 160-bit hash,
        /// pieces will be a string whose length is a multiple of 20 bytes.
        pub pieces: Vec<u8>,
        #[serde(rename = "piece length")]
        /// number of bytes per piece.
        pub piece_len: u64,
        #[serde(rename = "length")]
        /// size of the file in bytes (only when one file is being shared though)
        pub len: Option<u64>,
        /// a list of dictionaries each corresponding to a file (only when multiple files are being shared)
        pub files: Option<Vec<File>>,
        pub private: Option<u8>,
        pub source: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct File {
        /// a list of strings corresponding to subdirectory names, the last of which is the actual file name
        pub path: Vec<String>,
        #[serde(rename = "length")]
        /// size of the file in bytes
        pub len: u64,
    }
}
