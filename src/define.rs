/// A SHA-1 hash digest, 20 bytes long.
pub type Sha1Hash = [u8; 20];

/// One kibibyte.
pub const KIB: u64 = 1024;

/// One mebibyte.
pub const MIB: u64 = 1024 * KIB;

/// The name of the private metafile key holding fast-resume data.
pub const RESUME_KEY: &str = "libtorrent_resume";
