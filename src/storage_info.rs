use std::path::PathBuf;

/// Information about the torrent file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// file's relative path from the torrent root.
    pub path: PathBuf,
    /// the file's length
    pub len: u64,
    /// The byte offset of the file within the torrent, when all files in
    /// torrent are viewed as a single contiguous byte array. This is always
    /// 0 for a single file torrent.
    pub torrent_offset: u64,
}

impl FileInfo {
    /// Returns the number of pieces this file touches, counting the pieces it
    /// shares with its neighbours.
    ///
    /// This is the per file `completed` count a client expects in resume
    /// data when the whole file is present.
    pub fn piece_span(&self, piece_len: u64) -> u64 {
        debug_assert!(piece_len > 0);
        let end = self.torrent_offset + self.len;
        (end + piece_len - 1) / piece_len - self.torrent_offset / piece_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(torrent_offset: u64, len: u64) -> FileInfo {
        FileInfo {
            path: "f".into(),
            len,
            torrent_offset,
        }
    }

    #[test]
    fn should_count_whole_and_shared_pieces() {
        // exactly two pieces
        assert_eq!(file(0, 32).piece_span(16), 2);
        // spills into a third piece
        assert_eq!(file(0, 33).piece_span(16), 3);
        // starts inside piece 1, ends inside piece 2
        assert_eq!(file(20, 20).piece_span(16), 2);
        // entirely inside piece 0
        assert_eq!(file(4, 4).piece_span(16), 1);
    }
}
