//! Local filesystem storage.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! └── {spider}/
//!     └── YYYY/MM/DD/
//!         └── {sha256(url)}.{ext}
//! ```

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::SinkError;

/// Files rooted at one directory. Keys are relative paths.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the full path for a relative key.
    ///
    /// A leading `/` is ignored. Keys that would leave the root (`..`,
    /// drive prefixes) are rejected.
    pub fn path(&self, key: &str) -> Result<PathBuf, SinkError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(SinkError::io(
                relative,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "storage key must stay below the root directory",
                ),
            ));
        }
        Ok(self.root_dir.join(relative))
    }

    /// Ensure parent directory exists, creating every missing segment.
    async fn ensure_dir(&self, path: &Path) -> Result<(), SinkError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::io(parent, e))?;
        }
        Ok(())
    }

    /// Write bytes, replacing any existing file at the key.
    pub async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, SinkError> {
        let path = self.path(key)?;
        self.ensure_dir(&path).await?;

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| SinkError::io(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let path = storage.write_bytes("a/b/test.txt", b"hello").await.unwrap();
        assert_eq!(path, tmp.path().join("a/b/test.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_overwrite_truncates() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("x.bin", b"a much longer body").await.unwrap();
        let path = storage.write_bytes("x.bin", b"short").await.unwrap();

        assert_eq!(std::fs::read(path).unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_directory_creation_failure_is_io_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("blocker"), b"file").unwrap();
        let storage = LocalStorage::new(tmp.path());

        let err = storage.write_bytes("blocker/inner/x.txt", b"x").await.unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
    }

    #[test]
    fn test_leading_slash_stays_under_root() {
        let storage = LocalStorage::new("/data");
        assert_eq!(storage.path("/a/b.txt").unwrap(), PathBuf::from("/data/a/b.txt"));
    }

    #[test]
    fn test_keys_leaving_the_root_are_rejected() {
        let storage = LocalStorage::new("/data");
        for key in ["../x.txt", "a/../../x.txt", "a/b.x/../../../../escaped.txt", "", "/"] {
            let err = storage.path(key).unwrap_err();
            assert!(matches!(err, SinkError::Io { .. }), "{key} must be rejected");
        }
    }

    #[tokio::test]
    async fn test_escaping_write_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("root"));

        assert!(storage.write_bytes("a/../../escaped.txt", b"x").await.is_err());
        assert!(!tmp.path().join("escaped.txt").exists());
    }
}
