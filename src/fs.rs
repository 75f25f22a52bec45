//! File system abstraction for testability.

use async_trait::async_trait;
use std::path::Path;

/// Abstraction over the file operations used by chunk setup and merge.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Creates all directories in the given path.
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Creates (or truncates) a file at the given path and sizes it to `size` bytes.
    async fn create_file(&self, path: &Path, size: u64) -> std::io::Result<tokio::fs::File>;

    /// Opens an existing file for reading.
    async fn open_read(&self, path: &Path) -> std::io::Result<tokio::fs::File>;

    /// Renames a file, replacing the destination.
    async fn rename_file(&self, from: &Path, to: &Path) -> std::io::Result<()>;

    /// Removes a file.
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// Default file system implementation using `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Creates a new `TokioFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_file(&self, path: &Path, size: u64) -> std::io::Result<tokio::fs::File> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        // set_len leaves a hole on file systems that support sparse files
        file.set_len(size).await?;
        Ok(file)
    }

    async fn open_read(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(path).await
    }

    async fn rename_file(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn tokio_fs_create_dir_all() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");

        let fs = TokioFileSystem::new();
        fs.create_dir_all(&nested).await.unwrap();
        assert!(nested.exists());
    }

    #[tokio::test]
    async fn tokio_fs_create_file_is_presized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunk_0");

        let fs = TokioFileSystem::new();
        let _file = fs.create_file(&path, 1024).await.unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.len(), 1024);
    }

    #[tokio::test]
    async fn tokio_fs_create_file_truncates_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunk_0");
        std::fs::write(&path, b"stale data from an earlier run").unwrap();

        let fs = TokioFileSystem::new();
        let _file = fs.create_file(&path, 4).await.unwrap();

        let mut contents = Vec::new();
        fs.open_read(&path)
            .await
            .unwrap()
            .read_to_end(&mut contents)
            .await
            .unwrap();
        assert_eq!(contents, vec![0u8; 4]);
    }

    #[tokio::test]
    async fn tokio_fs_rename_and_remove() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("out.bin.part");
        let to = dir.path().join("out.bin");
        std::fs::write(&from, b"x").unwrap();

        let fs = TokioFileSystem::new();
        fs.rename_file(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert!(to.exists());

        fs.remove_file(&to).await.unwrap();
        assert!(!to.exists());
    }
}
