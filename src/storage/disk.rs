//! Directory-backed cold backends.
//!
//! Uses tokio's async file I/O. Object names map to paths under a root
//! directory; the bucket store adds one directory level per bucket:
//!
//! ```text
//! object_root/layer0.bin
//! bucket_root/models/layer0.bin
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use crate::storage::{check_key, BucketStore, ObjectSource, StorageError};

/// Read counters for a directory backend.
#[derive(Debug, Default)]
pub struct DiskReadStats {
    pub total_reads: AtomicU64,
    pub total_misses: AtomicU64,
    pub total_bytes_read: AtomicU64,
}

impl DiskReadStats {
    fn record(&self, result: &Option<Bytes>) {
        match result {
            Some(data) => {
                self.total_reads.fetch_add(1, Ordering::Relaxed);
                self.total_bytes_read
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            None => {
                self.total_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<Bytes>, StorageError> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

/// Authoritative source serving files from a directory.
#[derive(Debug)]
pub struct DirectoryObjectSource {
    root: PathBuf,
    stats: DiskReadStats,
}

impl DirectoryObjectSource {
    /// Create a source rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            stats: DiskReadStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> &DiskReadStats {
        &self.stats
    }
}

#[async_trait]
impl ObjectSource for DirectoryObjectSource {
    async fn fetch(&self, name: &str) -> Result<Option<Bytes>, StorageError> {
        check_key(name)?;
        let path = self.root.join(name);
        let result = read_optional(&path).await?;

        debug!(
            path = %path.display(),
            found = result.is_some(),
            size = result.as_ref().map_or(0, |d| d.len()),
            "Object source read"
        );
        self.stats.record(&result);
        Ok(result)
    }
}

/// Secondary cold store laid out as `root/<bucket>/<key>`.
#[derive(Debug)]
pub struct DirectoryBucketStore {
    root: PathBuf,
    stats: DiskReadStats,
}

impl DirectoryBucketStore {
    /// Create a store rooted at `root`, making sure `bucket` exists.
    pub async fn new(root: impl Into<PathBuf>, bucket: &str) -> Result<Self, StorageError> {
        check_key(bucket)?;
        let root = root.into();
        fs::create_dir_all(root.join(bucket)).await?;
        Ok(Self {
            root,
            stats: DiskReadStats::default(),
        })
    }

    /// Write an object into a bucket, creating parent directories.
    pub async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        check_key(bucket)?;
        check_key(key)?;
        let path = self.root.join(bucket).join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        debug!(path = %path.display(), size = data.len(), "Wrote object to bucket");
        Ok(path)
    }

    pub fn stats(&self) -> &DiskReadStats {
        &self.stats
    }
}

#[async_trait]
impl BucketStore for DirectoryBucketStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError> {
        check_key(bucket)?;
        check_key(key)?;
        let path = self.root.join(bucket).join(key);
        let result = read_optional(&path).await?;

        debug!(
            bucket,
            key,
            found = result.is_some(),
            "Bucket store read"
        );
        self.stats.record(&result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_object_source_read_and_miss() {
        let tmp = TempDir::new().unwrap();
        let source = DirectoryObjectSource::new(tmp.path().join("models")).await.unwrap();
        std::fs::write(source.root().join("layer0.bin"), vec![42u8; 4096]).unwrap();

        let data = source.fetch("layer0.bin").await.unwrap().unwrap();
        assert_eq!(data.len(), 4096);
        assert!(source.fetch("layer9.bin").await.unwrap().is_none());

        assert_eq!(source.stats().total_reads.load(Ordering::Relaxed), 1);
        assert_eq!(source.stats().total_misses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_object_source_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let source = DirectoryObjectSource::new(tmp.path().join("models")).await.unwrap();
        assert!(matches!(
            source.fetch("../outside").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_bucket_store_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = DirectoryBucketStore::new(tmp.path(), "models").await.unwrap();

        store.put_object("models", "bert/layer1.bin", b"weights").await.unwrap();
        let data = store.get_object("models", "bert/layer1.bin").await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"weights"[..]));
        assert!(store.get_object("models", "absent").await.unwrap().is_none());
    }
}
