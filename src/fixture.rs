//! Metafile builders and configuration shared by the unit tests.
use serde_derive::Serialize;

use crate::conf::ClientConf;

#[derive(Serialize)]
struct RawFile {
    length: u64,
    path: Vec<String>,
}

// field order matches bencode key order
#[derive(Serialize)]
struct RawInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<RawFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

#[derive(Serialize)]
struct RawMetainfo {
    announce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    info: RawInfo,
}

pub struct MetafileBuilder {
    name: String,
    files: Option<Vec<(String, u64)>>,
    length: u64,
    piece_len: u64,
    piece_count: Option<usize>,
    comment: Option<String>,
    source: Option<String>,
}

impl MetafileBuilder {
    pub fn single(name: &str, length: u64) -> Self {
        Self {
            name: name.to_string(),
            files: None,
            length,
            piece_len: 16 * 1024,
            piece_count: None,
            comment: None,
            source: None,
        }
    }

    pub fn multi(name: &str, files: &[(&str, u64)]) -> Self {
        let files: Vec<_> = files.iter().map(|(p, l)| (p.to_string(), *l)).collect();
        let length = files.iter().map(|(_, l)| l).sum();
        Self {
            files: Some(files),
            length,
            ..Self::single(name, 0)
        }
    }

    pub fn piece_len(mut self, piece_len: u64) -> Self {
        self.piece_len = piece_len;
        self
    }

    /// Overrides the piece count that would follow from the lengths.
    pub fn piece_count(mut self, count: usize) -> Self {
        self.piece_count = Some(count);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let count = self.piece_count.unwrap_or_else(|| {
            ((self.length + self.piece_len - 1) / self.piece_len).max(1) as usize
        });
        let info = RawInfo {
            files: self.files.as_ref().map(|files| {
                files
                    .iter()
                    .map(|(path, length)| RawFile {
                        length: *length,
                        path: path.split('/').map(str::to_string).collect(),
                    })
                    .collect()
            }),
            length: self.files.is_none().then_some(self.length),
            name: self.name,
            piece_length: self.piece_len,
            pieces: vec![0xab; count * 20],
            source: self.source,
        };
        let metainfo = RawMetainfo {
            announce: "https://tracker.example/announce".to_string(),
            comment: self.comment,
            info,
        };
        serde_bencode::to_bytes(&metainfo).expect("cannot encode test metafile")
    }
}

/// Builds a client configuration from JSON, leaving everything unset to
/// its default.
pub fn client_conf(json: serde_json::Value) -> ClientConf {
    serde_json::from_value(json).expect("invalid test client configuration")
}
