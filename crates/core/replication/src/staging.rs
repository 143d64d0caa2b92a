//! Filesystem access for the staging tree.
//!
//! Everything the engine does on disk goes through [`StagingFs`] so tests
//! can substitute an in-memory tree. Failures carry the path and operation
//! that failed, under the single `FsError` kind.

use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
};

/// Filesystem operations on the staging tree.
pub trait StagingFs {
    /// Creates a directory and all of its parents. Idempotent.
    fn create_dir_all(&self, path: &Path) -> impl Future<Output = Result<(), FsError>> + Send;

    fn read(&self, path: &Path) -> impl Future<Output = Result<Vec<u8>, FsError>> + Send;

    fn read_to_string(&self, path: &Path) -> impl Future<Output = Result<String, FsError>> + Send;

    fn write(&self, path: &Path, contents: &[u8])
        -> impl Future<Output = Result<(), FsError>> + Send;

    fn append(&self, path: &Path, text: &str) -> impl Future<Output = Result<(), FsError>> + Send;

    /// Returns the entry names of a directory, in no particular order.
    fn read_dir(&self, path: &Path) -> impl Future<Output = Result<Vec<String>, FsError>> + Send;

    fn rename(&self, from: &Path, to: &Path) -> impl Future<Output = Result<(), FsError>> + Send;

    fn remove_file(&self, path: &Path) -> impl Future<Output = Result<(), FsError>> + Send;
}

/// A filesystem operation on the staging tree failed.
#[derive(Debug, thiserror::Error)]
#[error("{op} failed for {path}: {source}")]
pub struct FsError {
    /// The operation that failed, e.g. `rename`.
    pub op: &'static str,
    /// The path the operation was applied to.
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FsError {
    fn new(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// [`StagingFs`] implementation over the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalStaging;

impl StagingFs for LocalStaging {
    async fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|source| FsError::new("mkdir", path, source))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        tokio::fs::read(path)
            .await
            .map_err(|source| FsError::new("read", path, source))
    }

    async fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| FsError::new("read", path, source))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|source| FsError::new("write", path, source))
    }

    async fn append(&self, path: &Path, text: &str) -> Result<(), FsError> {
        use tokio::io::AsyncWriteExt as _;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| FsError::new("append", path, source))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|source| FsError::new("append", path, source))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|source| FsError::new("readdir", path, source))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| FsError::new("readdir", path, source))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|source| FsError::new("rename", from, source))
    }

    async fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|source| FsError::new("unlink", path, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_rename_unlink_cycle() {
        //* Given
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = LocalStaging;
        let log = dir.path().join("000123.log.done");
        let renamed = dir.path().join("000123.log");

        //* When
        staging.write(&log, b"changes").await.expect("write");
        staging.rename(&log, &renamed).await.expect("rename");
        let names = staging.read_dir(dir.path()).await.expect("readdir");
        staging.remove_file(&renamed).await.expect("unlink");
        let after = staging.read_dir(dir.path()).await.expect("readdir");

        //* Then
        assert_eq!(names, vec!["000123.log".to_string()]);
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn create_dir_all_is_idempotent() {
        //* Given
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = LocalStaging;
        let nested = dir.path().join("changes").join("backup");

        //* When
        staging.create_dir_all(&nested).await.expect("first mkdir");
        staging.create_dir_all(&nested).await.expect("second mkdir");

        //* Then
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn append_creates_and_extends() {
        //* Given
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = LocalStaging;
        let path = dir.path().join("notes.txt");

        //* When
        staging.append(&path, "one\n").await.expect("append");
        staging.append(&path, "two\n").await.expect("append");

        //* Then
        let contents = staging.read_to_string(&path).await.expect("read");
        assert_eq!(contents, "one\ntwo\n");
    }

    #[tokio::test]
    async fn missing_file_reports_path_and_op() {
        //* Given
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = LocalStaging;
        let path = dir.path().join("absent.txt");

        //* When
        let err = staging.read_to_string(&path).await.expect_err("missing");

        //* Then
        assert_eq!(err.op, "read");
        assert_eq!(err.path, path);
    }
}
