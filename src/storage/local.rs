//! Local directory blob store
//!
//! Treats a directory as the root of a bucket: the key of a file is its
//! path relative to the root with `/` separators.

use super::{BlobObject, BlobStore};
use crate::error::{HeapSyncError, IoResultExt, Result};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Blob store backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    bucket: String,
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store serving `bucket` from `root`
    pub fn new(bucket: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            root: root.into(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(HeapSyncError::NotFound(format!(
                "key '{}' escapes bucket '{}'",
                key, self.bucket
            )));
        }
        Ok(self.root.join(relative))
    }

    fn modified(path: &Path) -> Result<DateTime<Utc>> {
        let metadata = std::fs::metadata(path).with_path(path)?;
        let modified = metadata.modified().with_path(path)?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

impl BlobStore for LocalBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobObject>> {
        if !self.root.is_dir() {
            return Err(HeapSyncError::NotFound(format!(
                "bucket '{}' at {}",
                self.bucket,
                self.root.display()
            )));
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| HeapSyncError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if key.starts_with(prefix) {
                objects.push(BlobObject {
                    last_modified: Self::modified(entry.path())?,
                    key,
                });
            }
        }

        tracing::debug!(bucket = %self.bucket, prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    fn fetch(&self, key: &str) -> Result<Box<dyn Read + '_>> {
        let path = self.resolve(key)?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                HeapSyncError::NotFound(format!("s3://{}/{}", self.bucket, key))
            }
            _ => HeapSyncError::io(&path, e),
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn head(&self, key: &str) -> Result<DateTime<Utc>> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(HeapSyncError::NotFound(format!(
                "s3://{}/{}",
                self.bucket, key
            )));
        }
        Self::modified(&path)
    }
}
