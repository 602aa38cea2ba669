//! Which filesystem volume a path lives on.
//!
//! Hard links only work within one volume, so the linker has to pick a
//! target directory on the same volume as the content. Windows answers this
//! with drive letters, everything else with the mount table.
use std::path::Path;
use std::sync::Arc;

pub trait VolumeResolver: Send + Sync {
    /// An identifier of the volume holding `path`. Two paths are on the
    /// same volume when their identifiers are equal.
    fn volume_of(&self, path: &Path) -> String;
}

/// Resolves volumes by drive letter, `C:\data` is on `C:`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriveLetter;

impl VolumeResolver for DriveLetter {
    fn volume_of(&self, path: &Path) -> String {
        let path = path.to_string_lossy();
        let mut chars = path.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => {
                format!("{}:", letter.to_ascii_uppercase())
            }
            _ => String::new(),
        }
    }
}

/// Resolves volumes to the most specific mount point containing the path.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    /// Mount points, longest first.
    mounts: Vec<String>,
}

impl MountTable {
    pub fn from_mounts<I, S>(mounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut mounts: Vec<String> = mounts.into_iter().map(Into::into).collect();
        mounts.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        mounts.dedup();
        Self { mounts }
    }

    /// Reads the mount table of the running system, from `/proc/mounts`
    /// or, where that does not exist, from the output of `mount`.
    ///
    /// An unreadable table leaves every path on `/`.
    pub fn from_system() -> Self {
        let mounts = match std::fs::read_to_string("/proc/mounts") {
            Ok(table) => parse_proc_mounts(&table),
            Err(_) => match std::process::Command::new("mount").output() {
                Ok(out) => parse_mount_output(&String::from_utf8_lossy(&out.stdout)),
                Err(e) => {
                    log::warn!("Error getting mount points: {}", e);
                    Vec::new()
                }
            },
        };
        log::trace!("{} mount points", mounts.len());
        Self::from_mounts(mounts)
    }
}

impl VolumeResolver for MountTable {
    fn volume_of(&self, path: &Path) -> String {
        let path = path.to_string_lossy();
        self.mounts
            .iter()
            .find(|mount| is_under(&path, mount))
            .cloned()
            .unwrap_or_else(|| "/".to_string())
    }
}

fn is_under(path: &str, mount: &str) -> bool {
    if mount == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(mount) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// The second field of every `/proc/mounts` line, with the kernel's octal
/// escapes for whitespace undone.
pub fn parse_proc_mounts(table: &str) -> Vec<String> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_octal)
        .collect()
}

/// The mount points in the output of `mount`: `dev on /mnt/x type ...` on
/// Linux or `dev on /mnt/x (apfs, ...)` on macOS.
fn parse_mount_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(2))
        .map(str::to_string)
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let code = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or_default();
            if let Ok(byte) = u8::from_str_radix(code, 8) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The resolver for the platform we run on.
pub fn system_resolver() -> Arc<dyn VolumeResolver> {
    if cfg!(windows) {
        Arc::new(DriveLetter)
    } else {
        Arc::new(MountTable::from_system())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn should_pick_most_specific_mount() {
        let table = MountTable::from_mounts(["/", "/mnt", "/mnt/media", "/mnt/media2"]);
        assert_eq!(table.volume_of(Path::new("/mnt/media/movies")), "/mnt/media");
        assert_eq!(table.volume_of(Path::new("/mnt/media2/x")), "/mnt/media2");
        assert_eq!(table.volume_of(Path::new("/mnt/other")), "/mnt");
        assert_eq!(table.volume_of(Path::new("/home/user")), "/");
    }

    #[test]
    fn should_fall_back_to_root_without_mounts() {
        let table = MountTable::default();
        assert_eq!(table.volume_of(Path::new("/data/x")), "/");
    }

    #[test]
    fn should_parse_proc_mounts() {
        let table = "\
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb1 /mnt/my\\040disk ext4 rw 0 0
tmpfs /dev/shm tmpfs rw 0 0
";
        assert_eq!(
            parse_proc_mounts(table),
            vec!["/", "/mnt/my disk", "/dev/shm"]
        );
    }

    #[test]
    fn should_parse_mount_output() {
        let output = "/dev/disk1s1 on / (apfs, local)\n/dev/disk2 on /Volumes/Media (hfs)\n";
        assert_eq!(parse_mount_output(output), vec!["/", "/Volumes/Media"]);
    }

    #[test]
    fn should_resolve_drive_letters() {
        assert_eq!(DriveLetter.volume_of(Path::new(r"c:\data\x")), "C:");
        assert_eq!(DriveLetter.volume_of(Path::new(r"D:\")), "D:");
        assert_eq!(DriveLetter.volume_of(Path::new(r"\\server\share")), "");
    }
}
