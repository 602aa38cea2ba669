//! Reuse and injection of torrent metafiles into local torrent clients.
//!
//! Given content that is already on disk, this crate decides whether an
//! existing metafile can be reused instead of hashing the data again, stages
//! the data into a tracker directory when linking is configured, and hands
//! the metafile to a torrent client so it starts seeding immediately.
pub mod conf;
pub mod error;
pub mod info_hash;
pub mod inject;
pub mod link;
pub mod metainfo;
pub mod path_map;
pub mod resume;
pub mod reuse;
pub mod search;
pub mod storage_info;

pub mod client;

#[cfg(test)]
pub(crate) mod fixture;

mod define;
pub use define::*;
