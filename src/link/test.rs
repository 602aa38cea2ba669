#[cfg(test)]
mod tests {
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::conf::LinkMode;
    use crate::error::link::LinkError;
    use crate::link::volume::MountTable;
    use crate::link::*;

    fn single_volume() -> Linker {
        Linker::new(Arc::new(MountTable::default()))
    }

    fn cross_device(_: &Path, _: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "cross-device link"))
    }

    fn release(root: &Path) -> PathBuf {
        let src = root.join("data/Release");
        std::fs::create_dir_all(src.join("Subs")).unwrap();
        std::fs::write(src.join("movie.mkv"), b"movie").unwrap();
        std::fs::write(src.join("Subs/en.srt"), b"subs").unwrap();
        src
    }

    fn request<'a>(source: &'a Path, mode: LinkMode, folders: &'a [PathBuf]) -> StageRequest<'a> {
        StageRequest {
            source,
            mode,
            linked_folders: folders,
            tracker: "AITHER",
        }
    }

    #[tokio::test]
    async fn should_skip_when_linking_disabled() {
        let dir = TempDir::new().unwrap();
        let src = release(dir.path());
        let staged = single_volume()
            .stage(&request(&src, LinkMode::None, &[]))
            .await
            .unwrap();
        assert!(staged.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn should_hard_link_each_file_once() {
        use std::os::unix::fs::MetadataExt;

        let dir = TempDir::new().unwrap();
        let src = release(dir.path());
        let folders = vec![dir.path().join("linked")];
        let linker = single_volume();
        let req = request(&src, LinkMode::Hardlink, &folders);

        let staged = linker.stage(&req).await.unwrap().unwrap();
        let dst = dir.path().join("linked/AITHER/Release");
        assert_eq!(staged.path, dst);
        assert_eq!(staged.tracker_dir, dir.path().join("linked/AITHER"));
        assert!(staged.linked);
        assert!(staged.warning.is_none());

        let linked = std::fs::metadata(dst.join("Subs/en.srt")).unwrap();
        let original = std::fs::metadata(src.join("Subs/en.srt")).unwrap();
        assert_eq!(linked.ino(), original.ino());

        // staging again must leave everything as it is
        let before = std::fs::metadata(&dst).unwrap().modified().unwrap();
        let again = linker.stage(&req).await.unwrap().unwrap();
        assert_eq!(again.path, staged.path);
        assert!(again.warning.is_none());
        assert_eq!(std::fs::metadata(&dst).unwrap().modified().unwrap(), before);
        assert_eq!(std::fs::metadata(dst.join("movie.mkv")).unwrap().nlink(), 2);
    }

    #[tokio::test]
    async fn should_copy_when_hard_link_fails() {
        let dir = TempDir::new().unwrap();
        let src = release(dir.path());
        let folders = vec![dir.path().join("linked")];
        let linker = single_volume().with_hard_link(cross_device);

        let staged = linker
            .stage(&request(&src, LinkMode::Hardlink, &folders))
            .await
            .unwrap()
            .unwrap();
        assert!(staged.linked);
        assert!(staged.warning.is_none());
        assert_eq!(
            std::fs::read(staged.path.join("movie.mkv")).unwrap(),
            b"movie"
        );
        assert_eq!(
            std::fs::read(staged.path.join("Subs/en.srt")).unwrap(),
            b"subs"
        );

        let copied = std::fs::metadata(staged.path.join("movie.mkv")).unwrap();
        let original = std::fs::metadata(src.join("movie.mkv")).unwrap();
        assert_eq!(copied.modified().unwrap(), original.modified().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn should_fall_back_to_source_when_tree_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let src = release(dir.path());
        // neither linkable nor copyable
        std::os::unix::fs::symlink(dir.path().join("gone"), src.join("dangling")).unwrap();
        let folders = vec![dir.path().join("linked")];
        let linker = single_volume().with_hard_link(cross_device);
        let req = request(&src, LinkMode::Hardlink, &folders);
        let tracker_dir = dir.path().join("linked/AITHER");

        let staged = linker.stage(&req).await.unwrap().unwrap();
        assert_eq!(staged.path, src);
        assert!(!staged.linked);
        assert!(matches!(staged.warning, Some(LinkError::CreateFailed { .. })));
        assert_eq!(std::fs::read_dir(&tracker_dir).unwrap().count(), 0);

        // nothing left behind that a later run would take as staged
        let again = linker.stage(&req).await.unwrap().unwrap();
        assert_eq!(again.path, src);
        assert!(!again.linked);
        assert!(again.warning.is_some());
    }

    #[tokio::test]
    async fn should_copy_single_file_when_hard_link_fails() {
        let dir = TempDir::new().unwrap();
        let src = release(dir.path()).join("movie.mkv");
        let folders = vec![dir.path().join("linked")];
        let linker = single_volume().with_hard_link(cross_device);

        let staged = linker
            .stage(&request(&src, LinkMode::Hardlink, &folders))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(staged.path, dir.path().join("linked/AITHER/movie.mkv"));
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"movie");
    }

    #[tokio::test]
    async fn should_pick_folder_on_source_volume() {
        let dir = TempDir::new().unwrap();
        let vol_a = dir.path().join("vol_a");
        let vol_b = dir.path().join("vol_b");
        let src = release(&vol_a);
        let mounts = MountTable::from_mounts([
            vol_a.to_string_lossy().into_owned(),
            vol_b.to_string_lossy().into_owned(),
        ]);
        let linker = Linker::new(Arc::new(mounts));
        let folders = vec![vol_b.join("links"), vol_a.join("links")];

        let staged = linker
            .stage(&request(&src, LinkMode::Hardlink, &folders))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(staged.tracker_dir, vol_a.join("links/AITHER"));
    }

    #[tokio::test]
    async fn should_fail_without_folder_on_source_volume() {
        let dir = TempDir::new().unwrap();
        let vol_a = dir.path().join("vol_a");
        let vol_b = dir.path().join("vol_b");
        let src = release(&vol_a);
        let mounts = MountTable::from_mounts([
            vol_a.to_string_lossy().into_owned(),
            vol_b.to_string_lossy().into_owned(),
        ]);
        let linker = Linker::new(Arc::new(mounts));
        let folders = vec![vol_b.join("links")];

        let err = linker
            .stage(&request(&src, LinkMode::Hardlink, &folders))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::TargetMissing { drive } if drive == vol_a.to_string_lossy()));
        assert!(!vol_b.join("links").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn should_symlink_across_volumes() {
        let dir = TempDir::new().unwrap();
        let vol_a = dir.path().join("vol_a");
        let vol_b = dir.path().join("vol_b");
        let src = release(&vol_a);
        let mounts = MountTable::from_mounts([
            vol_a.to_string_lossy().into_owned(),
            vol_b.to_string_lossy().into_owned(),
        ]);
        let linker = Linker::new(Arc::new(mounts));
        let folders = vec![vol_b.join("links")];

        let staged = linker
            .stage(&request(&src, LinkMode::Symlink, &folders))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(staged.path, vol_b.join("links/AITHER/Release"));
        assert_eq!(std::fs::read_link(&staged.path).unwrap(), src);
    }
}
