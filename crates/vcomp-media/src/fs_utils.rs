//! Filesystem helpers for render work directories and published outputs.

use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// EXDEV on Linux and macOS.
const EXDEV: i32 = 18;

/// Move `src` to `dst` and return the size of the published file.
///
/// Parents of `dst` are created. A rename across filesystems falls back to
/// copying into a sibling temp file and renaming it into place.
pub async fn publish_file(src: &Path, dst: &Path) -> MediaResult<u64> {
    if !fs::try_exists(src).await.unwrap_or(false) {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(EXDEV) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device publish, copying"
            );
            copy_then_remove(src, dst).await?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(fs::metadata(dst).await?.len())
}

async fn copy_then_remove(src: &Path, dst: &Path) -> MediaResult<()> {
    let staging = dst.with_extension("partial");

    if let Err(e) = fs::copy(src, &staging).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&staging, dst).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    if let Err(e) = fs::remove_file(src).await {
        warn!(src = %src.display(), "Failed to remove source after copy: {}", e);
    }
    Ok(())
}

/// Remove a directory tree, logging instead of failing.
pub async fn remove_dir_quietly(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Removed work directory"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), "Failed to remove work directory: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_publish_creates_parents_and_reports_size() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("work").join("render.mp4");
        let dst = dir.path().join("out").join("nested").join("final.mp4");
        fs::create_dir_all(src.parent().unwrap()).await.unwrap();
        fs::write(&src, b"0123456789").await.unwrap();

        let size = publish_file(&src, &dst).await.unwrap();

        assert_eq!(size, 10);
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_publish_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.mp4");
        let dst = dir.path().join("final.mp4");
        fs::write(&src, b"new").await.unwrap();
        fs::write(&dst, b"old content").await.unwrap();

        publish_file(&src, &dst).await.unwrap();
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_publish_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = publish_file(&dir.path().join("nope.mp4"), &dir.path().join("x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_dir_quietly() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("job-1");
        fs::create_dir_all(work.join("sub")).await.unwrap();
        fs::write(work.join("sub").join("f"), b"x").await.unwrap();

        remove_dir_quietly(&work).await;
        assert!(!work.exists());

        // Missing directory is fine
        remove_dir_quietly(&work).await;
    }
}
