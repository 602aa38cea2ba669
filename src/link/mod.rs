//! Staging content into per tracker directories.
//!
//! With linking enabled the client seeds from `<linked folder>/<tracker>/`
//! instead of the original location. Hard links are created file by file
//! and fall back to a copy when linking is impossible. A hard link tree is
//! built under a temporary name and only moved into place once every file
//! made it, so an existing staged entry is always complete. A symbolic link
//! is created once for the whole content.
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::conf::LinkMode;
pub use crate::error::link::Result;
use crate::error::link::LinkError;

pub mod volume;
mod test;

use self::volume::{system_resolver, VolumeResolver};

/// What to stage and where.
#[derive(Debug, Clone)]
pub struct StageRequest<'a> {
    pub source: &'a Path,
    pub mode: LinkMode,
    /// Candidate target directories, in preference order.
    pub linked_folders: &'a [PathBuf],
    pub tracker: &'a str,
}

/// The result of staging.
#[derive(Debug)]
pub struct Staged {
    /// The path the client should seed from: the link when it exists, the
    /// original source otherwise.
    pub path: PathBuf,
    pub tracker_dir: PathBuf,
    /// Whether `path` is the staged entry.
    pub linked: bool,
    /// A link that could not be created. The source stays usable.
    pub warning: Option<LinkError>,
}

type HardLinkFn = fn(&Path, &Path) -> io::Result<()>;

#[derive(Clone)]
pub struct Linker {
    resolver: Arc<dyn VolumeResolver>,
    hard_link: HardLinkFn,
}

impl Default for Linker {
    fn default() -> Self {
        Self::new(system_resolver())
    }
}

impl Linker {
    pub fn new(resolver: Arc<dyn VolumeResolver>) -> Self {
        Self {
            resolver,
            hard_link: std_hard_link,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_hard_link(mut self, hard_link: HardLinkFn) -> Self {
        self.hard_link = hard_link;
        self
    }

    /// Stages `req.source` into the tracker directory.
    ///
    /// Returns `Ok(None)` when linking is disabled. Fails only when no
    /// candidate directory can hold the link; failures to create the link
    /// itself are reported in [`Staged::warning`].
    pub async fn stage(&self, req: &StageRequest<'_>) -> Result<Option<Staged>> {
        if req.mode == LinkMode::None {
            return Ok(None);
        }
        let linker = self.clone();
        let source = req.source.to_path_buf();
        let folders = req.linked_folders.to_vec();
        let tracker = req.tracker.to_string();
        let mode = req.mode;
        tokio::task::spawn_blocking(move || {
            linker
                .stage_blocking(&StageRequest {
                    source: &source,
                    mode,
                    linked_folders: &folders,
                    tracker: &tracker,
                })
                .map(Some)
        })
        .await
        .map_err(|e| LinkError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }

    fn stage_blocking(&self, req: &StageRequest<'_>) -> Result<Staged> {
        let target = self.link_target(req)?;
        let tracker_dir = target.join(req.tracker);
        log::debug!("Linking to tracker directory {:?}", tracker_dir);

        // concurrent stagings may race here, an existing directory is fine
        if let Err(source) = std::fs::create_dir_all(&tracker_dir) {
            let warning = LinkError::CreateFailed {
                src: req.source.to_path_buf(),
                dst: tracker_dir.clone(),
                source,
            };
            return Ok(unlinked(req.source, tracker_dir, warning));
        }

        let name = match req.source.file_name() {
            Some(name) => name,
            None => {
                let warning = LinkError::CreateFailed {
                    src: req.source.to_path_buf(),
                    dst: tracker_dir.clone(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "source has no name"),
                };
                return Ok(unlinked(req.source, tracker_dir, warning));
            }
        };
        let dst = tracker_dir.join(name);

        if dst.symlink_metadata().is_ok() {
            log::debug!("Skipping linking, path already exists: {:?}", dst);
            return Ok(Staged {
                path: dst,
                tracker_dir,
                linked: true,
                warning: None,
            });
        }

        let created = match req.mode {
            LinkMode::Hardlink => self.hard_link_staged(req.source, &dst),
            LinkMode::Symlink => symlink(req.source, &dst).map_err(|source| {
                LinkError::CreateFailed {
                    src: req.source.to_path_buf(),
                    dst: dst.clone(),
                    source,
                }
            }),
            LinkMode::None => Ok(()),
        };

        match created {
            Ok(()) if dst.symlink_metadata().is_ok() => {
                log::info!("Linked {:?} -> {:?}", dst, req.source);
                Ok(Staged {
                    path: dst,
                    tracker_dir,
                    linked: true,
                    warning: None,
                })
            }
            Err(warning) => Ok(unlinked(req.source, tracker_dir, warning)),
            Ok(()) => {
                let warning = LinkError::CreateFailed {
                    src: req.source.to_path_buf(),
                    dst,
                    source: io::Error::new(io::ErrorKind::NotFound, "link was not created"),
                };
                Ok(unlinked(req.source, tracker_dir, warning))
            }
        }
    }

    /// Picks the candidate folder on the source's volume. A symbolic link
    /// may cross volumes, so that mode falls back to the first candidate.
    fn link_target(&self, req: &StageRequest<'_>) -> Result<PathBuf> {
        let src_volume = self.resolver.volume_of(req.source);
        let target = req.linked_folders.iter().find(|folder| {
            req.source.starts_with(folder) || self.resolver.volume_of(folder) == src_volume
        });
        log::debug!("Source volume {:?}, link target {:?}", src_volume, target);

        match (target, req.mode) {
            (Some(folder), _) => Ok(folder.clone()),
            (None, LinkMode::Symlink) if !req.linked_folders.is_empty() => {
                Ok(req.linked_folders[0].clone())
            }
            _ => {
                log::error!("No suitable linked folder found for drive {}", src_volume);
                Err(LinkError::TargetMissing { drive: src_volume })
            }
        }
    }

    /// Builds the tree at a temporary sibling of `dst` and renames it into
    /// place. Whatever was built is removed again when any file failed.
    fn hard_link_staged(&self, src: &Path, dst: &Path) -> Result<()> {
        let partial = partial_path(dst);
        if partial.symlink_metadata().is_ok() {
            log::debug!("Removing leftover partial staging {:?}", partial);
            remove_entry(&partial)?;
        }

        let result = self.hard_link_tree(src, &partial).and_then(|()| {
            std::fs::rename(&partial, dst).map_err(|source| LinkError::CreateFailed {
                src: partial.clone(),
                dst: dst.to_path_buf(),
                source,
            })
        });
        if result.is_err() && partial.symlink_metadata().is_ok() {
            if let Err(e) = remove_entry(&partial) {
                log::warn!("Failed to remove partial staging {:?}: {}", partial, e);
            }
        }
        result
    }

    /// Hard links every regular file under `src` into `dst`, copying the
    /// ones that cannot be linked. Keeps going after a failed file and
    /// reports the first failure.
    fn hard_link_tree(&self, src: &Path, dst: &Path) -> Result<()> {
        if !src.is_dir() {
            return self.link_or_copy(src, dst);
        }

        let mut first_error = None;
        for entry in WalkDir::new(src).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    first_error.get_or_insert(LinkError::Io(e.into()));
                    continue;
                }
            };
            let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
            let target = dst.join(rel);
            let result = if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target).map_err(|source| LinkError::CreateFailed {
                    src: entry.path().to_path_buf(),
                    dst: target.clone(),
                    source,
                })
            } else {
                self.link_or_copy(entry.path(), &target)
            };
            if let Err(e) = result {
                log::warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn link_or_copy(&self, src: &Path, dst: &Path) -> Result<()> {
        match (self.hard_link)(src, dst) {
            Ok(()) => {
                log::trace!("Hard link created: {:?} -> {:?}", dst, src);
                Ok(())
            }
            Err(e) => {
                log::warn!("Hard link of {:?} failed ({}), copying instead", src, e);
                copy_with_mtime(src, dst).map_err(|source| LinkError::CreateFailed {
                    src: src.to_path_buf(),
                    dst: dst.to_path_buf(),
                    source,
                })
            }
        }
    }
}

fn unlinked(source: &Path, tracker_dir: PathBuf, warning: LinkError) -> Staged {
    log::warn!("{}, continuing with the original path", warning);
    Staged {
        path: source.to_path_buf(),
        tracker_dir,
        linked: false,
        warning: Some(warning),
    }
}

fn partial_path(dst: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(dst.file_name().unwrap_or_default());
    name.push(".partial");
    dst.with_file_name(name)
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if path.symlink_metadata()?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn std_hard_link(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::hard_link(src, dst)
}

/// Copies a file and carries its modification time over, so resume data
/// built from the copy matches the original.
fn copy_with_mtime(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::copy(src, dst)?;
    let mtime = std::fs::metadata(src)?.modified()?;
    File::options().write(true).open(dst)?.set_modified(mtime)
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}
