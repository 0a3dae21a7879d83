//! Filesystem-backed response store.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::cache::key::entry_path;
use crate::cache::lock::KeyedLocks;
use crate::http::request::Target;

/// Cache failures. Never fatal: callers log and carry on without the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache entry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write cache entry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Maps targets to files under a root directory.
///
/// There is no in-memory index; every call goes to disk. Entries are never
/// expired or evicted.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    locks: KeyedLocks,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the entry for `target` lives.
    pub fn path_for(&self, target: &Target) -> PathBuf {
        entry_path(&self.root, target)
    }

    /// Whether an entry file exists. Content is not checked.
    pub async fn exists(&self, target: &Target) -> bool {
        matches!(fs::metadata(self.path_for(target)).await, Ok(meta) if meta.is_file())
    }

    /// Raw stored bytes.
    pub async fn read(&self, target: &Target) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(target);
        fs::read(&path)
            .await
            .map_err(|source| CacheError::Read { path, source })
    }

    /// Store `content` for `target`, replacing any previous entry.
    ///
    /// The content goes to a temp file under the root and is renamed into
    /// place, so readers see either the old or the new entry in full.
    /// Writers to the same key are serialized.
    pub async fn write(&self, target: &Target, content: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(target);
        let _guard = self.locks.lock(&path).await;

        match self.write_entry(&path, content).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), bytes = content.len(), "Cache entry written");
                Ok(())
            }
            Err(source) => Err(CacheError::Write { path, source }),
        }
    }

    async fn write_entry(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.root.join(format!("tmp_{}", uuid::Uuid::new_v4()));
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(content).await?;
            file.flush().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }

    /// Remove leftover temp files from an interrupted write.
    pub async fn remove_temp_files(&self) -> io::Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_temp = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with("tmp_"))
                .unwrap_or(false);
            if is_temp && entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await.ok();
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target(path: &str) -> Target {
        Target {
            host: "example.org".into(),
            port: 80,
            path: path.into(),
        }
    }

    #[tokio::test]
    async fn write_then_read_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let key = target("/index.html");
        let content = b"HTTP/1.1 200 OK\r\nCache Hit: 1\r\n\r\n\xff\x00binary";

        assert!(!store.exists(&key).await);
        store.write(&key, content).await.unwrap();
        assert!(store.exists(&key).await);
        assert_eq!(store.read(&key).await.unwrap(), content.to_vec());
        assert!(dir.path().join("example.org/80/index.html").is_file());
    }

    #[tokio::test]
    async fn query_with_parent_segments_is_stored_under_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let store = CacheStore::new(&root);
        let request = crate::http::request::ParsedRequest::parse(
            b"GET http://h/x?/../../../../escaped HTTP/1.1",
        )
        .unwrap();

        store.write(&request.target, b"entry").await.unwrap();

        assert!(store.path_for(&request.target).starts_with(root.join("h/80")));
        assert!(!dir.path().join("escaped").exists());
        assert_eq!(store.read(&request.target).await.unwrap(), b"entry".to_vec());
    }

    #[tokio::test]
    async fn write_overwrites_previous_entry() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let key = target("/a");

        store.write(&key, b"a much longer first version").await.unwrap();
        store.write(&key, b"second").await.unwrap();
        assert_eq!(store.read(&key).await.unwrap(), b"second".to_vec());
    }

    #[tokio::test]
    async fn read_of_missing_entry_is_read_error() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let err = store.read(&target("/gone")).await.unwrap_err();
        assert!(matches!(err, CacheError::Read { .. }));
    }

    #[tokio::test]
    async fn write_conflicting_with_file_is_write_error() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        store.write(&target("/a"), b"file").await.unwrap();

        // `/a` is a file, so `/a/b` cannot be created beneath it.
        let err = store.write(&target("/a/b"), b"nested").await.unwrap_err();
        assert!(matches!(err, CacheError::Write { .. }));
        assert_eq!(store.remove_temp_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_writes_leave_one_complete_entry() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let key = target("/race");

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.write(&key, &vec![i; 4096]).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = store.read(&key).await.unwrap();
        assert_eq!(content.len(), 4096);
        assert!(content.iter().all(|&b| b == content[0]));
    }

    #[tokio::test]
    async fn stale_temp_files_are_removed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tmp_leftover"), b"partial").unwrap();
        let store = CacheStore::new(dir.path());
        assert_eq!(store.remove_temp_files().await.unwrap(), 1);
        assert!(!dir.path().join("tmp_leftover").exists());
    }
}
