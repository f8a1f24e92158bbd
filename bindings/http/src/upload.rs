//! Upload bookkeeping on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

/// An uploaded file that is removed from disk when dropped, unless
/// [`TempUpload::keep`] was called.
#[derive(Debug)]
pub struct TempUpload {
    id: Uuid,
    path: PathBuf,
    armed: bool,
}

impl TempUpload {
    /// Write `bytes` to `<dir>/<uuid>_<label>.<ext>`.
    pub async fn store(dir: &Path, label: &str, ext: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let id = Uuid::new_v4();
        let path = dir.join(format!("{id}_{label}.{ext}"));
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "upload stored");
        Ok(Self {
            id,
            path,
            armed: true,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the file on disk; periodic cleanup removes it later.
    pub fn keep(mut self) -> Uuid {
        self.armed = false;
        self.id
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "upload removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(path = %self.path.display(), error = %err, "failed to remove upload"),
        }
    }
}

/// Find the stored file whose name starts with `<id>_<label>`.
pub async fn find_stored(dir: &Path, id: Uuid, label: &str) -> std::io::Result<Option<PathBuf>> {
    let prefix = format!("{id}_{label}");
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// Delete regular files in `dir` last modified more than `max_age` ago.
///
/// Returns how many were removed.
#[tracing::instrument(name = "Clean up old uploads", skip(dir), fields(dir = %dir.display()), err)]
pub async fn cleanup_old_files(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age > max_age {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
    }
    if removed > 0 {
        tracing::info!(removed, "old uploads removed");
    }
    Ok(removed)
}

/// Run [`cleanup_old_files`] over each of `dirs`. A failing directory is
/// logged and skipped.
pub async fn cleanup_dirs(dirs: &[PathBuf], max_age: Duration) -> usize {
    let mut removed = 0;
    for dir in dirs {
        match cleanup_old_files(dir, max_age).await {
            Ok(count) => removed += count,
            Err(err) => tracing::warn!(error = %err, dir = %dir.display(), "cleanup failed"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_upload_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let upload = TempUpload::store(dir.path(), "child", "jpg", b"bytes").await.unwrap();
        let path = upload.path().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_child.jpg"));
        drop(upload);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn kept_upload_survives_and_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let upload = TempUpload::store(dir.path(), "template", "png", b"bytes").await.unwrap();
        let path = upload.path().to_path_buf();
        let id = upload.keep();
        assert!(path.exists());
        assert_eq!(find_stored(dir.path(), id, "template").await.unwrap(), Some(path));
        assert_eq!(find_stored(dir.path(), Uuid::new_v4(), "template").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cleanup_spares_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        let id = TempUpload::store(dir.path(), "template", "png", b"x").await.unwrap().keep();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let removed = cleanup_old_files(dir.path(), Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 0);
        assert!(find_stored(dir.path(), id, "template").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        TempUpload::store(dir.path(), "child", "jpg", b"x").await.unwrap().keep();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = cleanup_old_files(dir.path(), Duration::from_millis(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn cleanup_covers_every_directory() {
        let root = tempfile::tempdir().unwrap();
        let uploads = root.path().join("uploads");
        let outputs = root.path().join("outputs");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&outputs).unwrap();
        TempUpload::store(&uploads, "child", "jpg", b"x").await.unwrap().keep();
        std::fs::write(outputs.join("old_personalized.png"), b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let missing = root.path().join("missing");
        let dirs = [uploads.clone(), missing, outputs.clone()];
        assert_eq!(cleanup_dirs(&dirs, Duration::from_millis(1)).await, 2);
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&outputs).unwrap().count(), 0);
    }
}
