//! File operations module
//! Provides copy, move, rename, delete, atomic write and date-touch operations

use crate::OpControl;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Suffix of the temporary file a copy is written to before it is renamed into place
const PARTIAL_SUFFIX: &str = ".mlpartial";

/// File operation errors
#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trash error: {0}")]
    #[cfg(feature = "trash-support")]
    Trash(#[from] trash::Error),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("File already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, FileOpError>;

/// How a move was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    /// Same filesystem, a single rename
    Renamed,
    /// Cross filesystem, copied (this many bytes) then deleted the source
    CopiedAndDeleted(u64),
}

/// File operations used by batch actions
#[derive(Debug, Clone)]
pub struct FileOperations {
    chunk_size: usize,
    use_trash: bool,
    create_missing_dirs: bool,
}

impl FileOperations {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(4096),
            use_trash: false,
            create_missing_dirs: true,
        }
    }

    /// Send deletions to the recycle bin instead of removing them
    pub fn with_trash(mut self, use_trash: bool) -> Self {
        self.use_trash = use_trash;
        self
    }

    /// Create missing destination directories before writing
    pub fn with_create_missing_dirs(mut self, create: bool) -> Self {
        self.create_missing_dirs = create;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copy a single file, reporting `(copied, total)` after every chunk.
    ///
    /// Data goes to a sibling temporary file first and is renamed over `to`
    /// only when complete, so a cancelled copy never leaves a truncated target.
    pub async fn copy_file(
        &self,
        from: &Path,
        to: &Path,
        ctl: &OpControl,
        on_progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<u64> {
        let metadata = fs::metadata(from).await.map_err(|e| map_io(e, from))?;
        if metadata.is_dir() {
            return Err(FileOpError::InvalidOperation(format!(
                "{} is a directory",
                from.display()
            )));
        }
        if from == to {
            return Err(FileOpError::InvalidOperation(format!(
                "Source and destination are the same: {}",
                from.display()
            )));
        }

        self.prepare_parent(to).await?;

        let partial = with_suffix(to, PARTIAL_SUFFIX);
        let total = metadata.len();

        match self.copy_chunks(from, &partial, total, ctl, on_progress).await {
            Ok(copied) => {
                fs::rename(&partial, to).await.map_err(|e| map_io(e, to))?;
                tracing::info!("Copied: {} -> {} ({} bytes)", from.display(), to.display(), copied);
                Ok(copied)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        tracing::warn!("Failed to remove partial copy {}: {}", partial.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn copy_chunks(
        &self,
        from: &Path,
        partial: &Path,
        total: u64,
        ctl: &OpControl,
        on_progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<u64> {
        let mut reader = fs::File::open(from).await.map_err(|e| map_io(e, from))?;
        let mut writer = fs::File::create(partial).await.map_err(|e| map_io(e, partial))?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut copied = 0u64;

        loop {
            ctl.checkpoint().await?;

            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            copied += n as u64;
            on_progress(copied, total);
        }

        writer.flush().await?;
        Ok(copied)
    }

    /// Move a file, falling back to copy + delete across filesystems
    pub async fn move_file(
        &self,
        from: &Path,
        to: &Path,
        ctl: &OpControl,
        on_progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<MoveMethod> {
        if fs::metadata(from).await.is_err() {
            return Err(FileOpError::NotFound(from.to_path_buf()));
        }
        ctl.checkpoint().await?;
        self.prepare_parent(to).await?;

        // Try rename first (fast, same filesystem)
        match fs::rename(from, to).await {
            Ok(()) => {
                tracing::info!("Moved: {} -> {}", from.display(), to.display());
                Ok(MoveMethod::Renamed)
            }
            Err(e) if is_cross_device(&e) => {
                tracing::info!(
                    "Cross-filesystem move, using copy+delete: {} -> {}",
                    from.display(),
                    to.display()
                );
                let copied = self.copy_file(from, to, ctl, on_progress).await?;
                fs::remove_file(from).await.map_err(|e| map_io(e, from))?;
                tracing::info!("Moved (copy+delete): {} -> {}", from.display(), to.display());
                Ok(MoveMethod::CopiedAndDeleted(copied))
            }
            Err(e) => Err(map_io(e, from)),
        }
    }

    /// Rename a file or directory
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if fs::metadata(from).await.is_err() {
            return Err(FileOpError::NotFound(from.to_path_buf()));
        }

        // A case-only rename sees its own source as the existing target
        if fs::metadata(to).await.is_ok() && !is_case_only_change(from, to) {
            return Err(FileOpError::AlreadyExists(to.to_path_buf()));
        }

        self.prepare_parent(to).await?;
        fs::rename(from, to).await.map_err(|e| map_io(e, from))?;
        tracing::info!("Renamed: {} -> {}", from.display(), to.display());

        Ok(())
    }

    /// Delete a single file
    pub async fn delete_file(&self, path: &Path) -> Result<()> {
        let metadata = fs::metadata(path).await.map_err(|e| map_io(e, path))?;
        if metadata.is_dir() {
            return Err(FileOpError::InvalidOperation(format!(
                "{} is a directory",
                path.display()
            )));
        }

        if self.use_trash {
            return self.move_to_trash(path).await;
        }

        fs::remove_file(path).await.map_err(|e| map_io(e, path))?;
        tracing::warn!("Permanently deleted: {}", path.display());
        Ok(())
    }

    /// Delete a directory and everything below it
    pub async fn delete_dir(&self, path: &Path) -> Result<()> {
        let metadata = fs::metadata(path).await.map_err(|e| map_io(e, path))?;
        if !metadata.is_dir() {
            return Err(FileOpError::InvalidOperation(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        if self.use_trash {
            return self.move_to_trash(path).await;
        }

        fs::remove_dir_all(path).await.map_err(|e| map_io(e, path))?;
        tracing::warn!("Permanently deleted directory: {}", path.display());
        Ok(())
    }

    #[cfg(feature = "trash-support")]
    async fn move_to_trash(&self, path: &Path) -> Result<()> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || trash::delete(&owned))
            .await
            .map_err(|e| FileOpError::InvalidOperation(format!("Trash task failed: {}", e)))??;
        tracing::info!("Moved to trash: {}", path.display());
        Ok(())
    }

    #[cfg(not(feature = "trash-support"))]
    async fn move_to_trash(&self, _path: &Path) -> Result<()> {
        Err(FileOpError::InvalidOperation(
            "Trash feature not enabled".to_string(),
        ))
    }

    /// Write `contents` to `path` via a temporary sibling and a rename
    pub async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.prepare_parent(path).await?;

        let temp = with_suffix(path, PARTIAL_SUFFIX);
        if let Err(e) = fs::write(&temp, contents).await {
            let _ = fs::remove_file(&temp).await;
            return Err(map_io(e, path));
        }
        fs::rename(&temp, path).await.map_err(|e| map_io(e, path))?;

        tracing::debug!("Wrote {} bytes to {}", contents.len(), path.display());
        Ok(())
    }

    /// Set the modification time of a file or directory
    pub async fn touch_modified(&self, path: &Path, when: SystemTime) -> Result<()> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let file = if owned.is_dir() {
                std::fs::File::open(&owned)?
            } else {
                std::fs::OpenOptions::new().write(true).open(&owned)?
            };
            file.set_modified(when)
        })
        .await
        .map_err(|e| FileOpError::InvalidOperation(format!("Touch task failed: {}", e)))?
        .map_err(|e| map_io(e, path))?;

        tracing::debug!("Touched: {}", path.display());
        Ok(())
    }

    async fn prepare_parent(&self, path: &Path) -> Result<()> {
        let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        if fs::metadata(parent).await.is_ok() {
            return Ok(());
        }
        if !self.create_missing_dirs {
            return Err(FileOpError::NotFound(parent.to_path_buf()));
        }

        fs::create_dir_all(parent).await.map_err(|e| map_io(e, parent))?;
        tracing::info!("Created directory: {}", parent.display());
        Ok(())
    }
}

impl Default for FileOperations {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

fn map_io(err: io::Error, path: &Path) -> FileOpError {
    match err.kind() {
        io::ErrorKind::NotFound => FileOpError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => FileOpError::PermissionDenied(path.to_path_buf()),
        io::ErrorKind::AlreadyExists => FileOpError::AlreadyExists(path.to_path_buf()),
        _ => FileOpError::Io(err),
    }
}

// Unix: EXDEV = 18, Windows: ERROR_NOT_SAME_DEVICE = 0x11 (17)
fn is_cross_device(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(18) => cfg!(unix),
        Some(17) => cfg!(windows),
        _ => false,
    }
}

fn is_case_only_change(from: &Path, to: &Path) -> bool {
    from != to
        && from.to_string_lossy().to_lowercase() == to.to_string_lossy().to_lowercase()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    fn no_progress() -> impl FnMut(u64, u64) + Send {
        |_, _| {}
    }

    #[tokio::test]
    async fn test_copy_file_reports_progress() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.mkv");
        let to = dir.path().join("nested").join("b.mkv");
        std::fs::write(&from, vec![7u8; 10_000]).unwrap();

        let ops = FileOperations::new(4096);
        let mut calls = Vec::new();
        let mut progress = |done: u64, total: u64| calls.push((done, total));
        let copied = ops
            .copy_file(&from, &to, &OpControl::detached(), &mut progress)
            .await
            .unwrap();

        assert_eq!(copied, 10_000);
        assert_eq!(std::fs::read(&to).unwrap().len(), 10_000);
        assert!(from.exists());
        assert!(calls.len() >= 3);
        assert_eq!(calls.last(), Some(&(10_000, 10_000)));
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let dir = TempDir::new().unwrap();
        let ops = FileOperations::default();
        let err = ops
            .copy_file(
                &dir.path().join("missing.avi"),
                &dir.path().join("out.avi"),
                &OpControl::detached(),
                &mut no_progress(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FileOpError::NotFound(_)));
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_cancelled_copy_leaves_no_target() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.bin");
        let to = dir.path().join("b.bin");
        std::fs::write(&from, vec![1u8; 64 * 1024]).unwrap();

        let (_tx, rx) = watch::channel(false);
        let token = CancellationToken::new();
        token.cancel();
        let ctl = OpControl::new(rx, token);

        let err = FileOperations::new(4096)
            .copy_file(&from, &to, &ctl, &mut no_progress())
            .await
            .unwrap_err();

        assert!(matches!(err, FileOpError::Cancelled));
        assert!(!to.exists());
        assert!(!with_suffix(&to, PARTIAL_SUFFIX).exists());
    }

    #[tokio::test]
    async fn test_move_file_same_volume() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("episode.mkv");
        let to = dir.path().join("Season 01").join("episode.mkv");
        std::fs::write(&from, b"data").unwrap();

        let method = FileOperations::default()
            .move_file(&from, &to, &OpControl::detached(), &mut no_progress())
            .await
            .unwrap();

        assert_eq!(method, MoveMethod::Renamed);
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_refuses_existing_target() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.txt");
        let to = dir.path().join("b.txt");
        std::fs::write(&from, b"a").unwrap();
        std::fs::write(&to, b"b").unwrap();

        let err = FileOperations::default().rename(&from, &to).await.unwrap_err();
        assert!(matches!(err, FileOpError::AlreadyExists(_)));
        assert!(from.exists());
    }

    #[tokio::test]
    async fn test_delete_file_and_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("sample.avi");
        let sub = dir.path().join("extras");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(sub.join("deeper")).unwrap();

        let ops = FileOperations::default();
        ops.delete_file(&file).await.unwrap();
        ops.delete_dir(&sub).await.unwrap();

        assert!(!file.exists());
        assert!(!sub.exists());
        assert!(matches!(
            ops.delete_file(&file).await.unwrap_err(),
            FileOpError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_write_atomic_and_touch() {
        let dir = TempDir::new().unwrap();
        let nfo = dir.path().join("show").join("tvshow.nfo");
        let ops = FileOperations::default();

        ops.write_atomic(&nfo, b"<tvshow/>").await.unwrap();
        assert_eq!(std::fs::read(&nfo).unwrap(), b"<tvshow/>");

        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        ops.touch_modified(&nfo, when).await.unwrap();
        let modified = std::fs::metadata(&nfo).unwrap().modified().unwrap();
        assert_eq!(modified, when);
    }

    #[test]
    fn test_case_only_change() {
        assert!(is_case_only_change(Path::new("/tv/show.MKV"), Path::new("/tv/show.mkv")));
        assert!(!is_case_only_change(Path::new("/tv/a.mkv"), Path::new("/tv/b.mkv")));
        assert!(!is_case_only_change(Path::new("/tv/a.mkv"), Path::new("/tv/a.mkv")));
    }
}
