//! Object storage module
//!
//! The sync engine only talks to storage through [`BlobStore`]. A local
//! directory can stand in for a bucket, and the native S3 client is
//! available behind the `native_s3` feature.

mod local;
#[cfg(feature = "native_s3")]
mod s3;

pub use local::*;
#[cfg(feature = "native_s3")]
pub use s3::*;

use crate::error::{HeapSyncError, Result};
use chrono::{DateTime, Utc};
use std::io::{Read, Write};

/// An object returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    /// Object key, relative to the bucket root
    pub key: String,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
}

/// Read access to a bucket of dump files
pub trait BlobStore {
    /// Bucket identifier
    fn bucket(&self) -> &str;

    /// List every object whose key starts with `prefix`
    fn list(&self, prefix: &str) -> Result<Vec<BlobObject>>;

    /// Open an object for reading
    fn fetch(&self, key: &str) -> Result<Box<dyn Read + '_>>;

    /// Modification time of an object
    fn head(&self, key: &str) -> Result<DateTime<Utc>>;

    /// Copy an object into `dest`, returning the number of bytes written
    fn download(&self, key: &str, dest: &mut dyn Write) -> Result<u64> {
        let mut reader = self.fetch(key)?;
        std::io::copy(&mut reader, dest)
            .map_err(|e| HeapSyncError::Storage(format!("download of '{}' failed: {}", key, e)))
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn bucket(&self) -> &str {
        (**self).bucket()
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobObject>> {
        (**self).list(prefix)
    }

    fn fetch(&self, key: &str) -> Result<Box<dyn Read + '_>> {
        (**self).fetch(key)
    }

    fn head(&self, key: &str) -> Result<DateTime<Utc>> {
        (**self).head(key)
    }

    fn download(&self, key: &str, dest: &mut dyn Write) -> Result<u64> {
        (**self).download(key, dest)
    }
}
