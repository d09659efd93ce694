//! Native AWS S3 SDK integration
//!
//! Wraps the async AWS SDK behind the blocking [`BlobStore`] interface the
//! sync engine uses. Requests run on a private current-thread runtime.
//! Supports S3-compatible endpoints (MinIO, Wasabi, etc.) and retries
//! downloads with exponential backoff.

use super::{BlobObject, BlobStore};
use crate::config::TapConfig;
use crate::error::{HeapSyncError, Result};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use chrono::{DateTime, Utc};
use std::io::{Cursor, Read, Write};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Maximum retry delay cap in seconds.
const MAX_RETRY_DELAY_SECS: u64 = 64;

/// Configuration for the native S3 store.
#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    /// Bucket name
    pub bucket: String,
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// Custom endpoint URL for S3-compatible services (MinIO, Wasabi)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for some S3-compatible services)
    pub force_path_style: bool,
    /// Maximum number of retries per download
    pub max_retries: u32,
}

impl S3StoreConfig {
    /// Build from the tap configuration
    pub fn from_tap(config: &TapConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            force_path_style: config.force_path_style,
            max_retries: config.max_retries,
        }
    }
}

/// Blob store backed by the AWS SDK
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    config: S3StoreConfig,
    runtime: Runtime,
}

impl S3BlobStore {
    /// Create a new S3 store from configuration.
    pub fn new(config: S3StoreConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HeapSyncError::config(format!("Failed to create runtime: {}", e)))?;

        let client = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(config.region.clone()));

            if let Some(ref endpoint) = config.endpoint_url {
                loader = loader.endpoint_url(endpoint);
            }

            let sdk_config = loader.load().await;
            let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
            if config.force_path_style {
                s3_config = s3_config.force_path_style(true);
            }
            aws_sdk_s3::Client::from_conf(s3_config.build())
        });

        Ok(Self {
            client,
            config,
            runtime,
        })
    }

    async fn get_object(&self, key: &str) -> Result<GetObjectOutput> {
        self.client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    HeapSyncError::NotFound(format!("s3://{}/{}", self.config.bucket, key))
                } else {
                    HeapSyncError::Storage(format!(
                        "S3 get_object failed: {}",
                        DisplayErrorContext(&e)
                    ))
                }
            })
    }

    /// Fetch an object body once.
    fn try_fetch(&self, key: &str) -> Result<Vec<u8>> {
        self.runtime.block_on(async {
            let resp = self.get_object(key).await?;
            let body = resp.body.collect().await.map_err(|e| {
                HeapSyncError::Storage(format!("S3 body read failed: {}", e))
            })?;

            Ok(body.into_bytes().to_vec())
        })
    }

    /// Stream an object body into `dest` once, counting bytes in `written`.
    fn try_download(&self, key: &str, dest: &mut dyn Write, written: &mut u64) -> Result<()> {
        self.runtime.block_on(async {
            let mut resp = self.get_object(key).await?;
            while let Some(chunk) = resp.body.try_next().await.map_err(|e| {
                HeapSyncError::Storage(format!("S3 body read of '{}' failed: {}", key, e))
            })? {
                dest.write_all(&chunk).map_err(|e| {
                    HeapSyncError::Sink(format!("write of '{}' failed: {}", key, e))
                })?;
                *written += chunk.len() as u64;
            }
            Ok(())
        })
    }

    /// Fetch an object body, retrying recoverable failures.
    fn fetch_with_retry(&self, key: &str) -> Result<Vec<u8>> {
        let mut retries = 0;
        loop {
            match self.try_fetch(key) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if retry_allowed(&e, retries, self.config.max_retries, 0) => {
                    retries += 1;
                    self.backoff(key, retries, &e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, key: &str, retries: u32, error: &HeapSyncError) {
        let delay = exponential_backoff_delay(retries);
        tracing::warn!(
            "S3 download of '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
            key,
            retries,
            self.config.max_retries,
            error,
            delay
        );
        std::thread::sleep(delay);
    }
}

/// Whether a failed transfer may be attempted again. Once bytes have
/// reached the destination the transfer cannot be restarted.
fn retry_allowed(error: &HeapSyncError, retries: u32, max_retries: u32, written: u64) -> bool {
    error.is_recoverable() && retries < max_retries && written == 0
}

impl BlobStore for S3BlobStore {
    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobObject>> {
        self.runtime.block_on(async {
            let mut objects = Vec::new();
            let mut continuation: Option<String> = None;

            loop {
                let resp = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.config.bucket)
                    .prefix(prefix)
                    .max_keys(1000)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                    .map_err(|e| {
                        if e.as_service_error().map(|se| se.is_no_such_bucket()).unwrap_or(false) {
                            HeapSyncError::NotFound(format!("bucket '{}'", self.config.bucket))
                        } else {
                            HeapSyncError::Storage(format!(
                                "S3 list_objects_v2 failed: {}",
                                DisplayErrorContext(&e)
                            ))
                        }
                    })?;

                for object in resp.contents() {
                    let Some(key) = object.key() else { continue };
                    let last_modified = object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                        .unwrap_or_default();
                    objects.push(BlobObject {
                        key: key.to_string(),
                        last_modified,
                    });
                }

                match resp.next_continuation_token() {
                    Some(token) if resp.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }

            tracing::debug!(bucket = %self.config.bucket, prefix, count = objects.len(), "Listed objects");
            Ok(objects)
        })
    }

    fn fetch(&self, key: &str) -> Result<Box<dyn Read + '_>> {
        let bytes = self.fetch_with_retry(key)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn head(&self, key: &str) -> Result<DateTime<Utc>> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .head_object()
                .bucket(&self.config.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                        HeapSyncError::NotFound(format!("s3://{}/{}", self.config.bucket, key))
                    } else {
                        HeapSyncError::Storage(format!(
                            "S3 head_object failed: {}",
                            DisplayErrorContext(&e)
                        ))
                    }
                })?;

            resp.last_modified()
                .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                .ok_or_else(|| {
                    HeapSyncError::Storage(format!("S3 head_object for '{}' has no Last-Modified", key))
                })
        })
    }

    fn download(&self, key: &str, dest: &mut dyn Write) -> Result<u64> {
        let mut retries = 0;
        loop {
            let mut written = 0;
            match self.try_download(key, dest, &mut written) {
                Ok(()) => return Ok(written),
                Err(e) if retry_allowed(&e, retries, self.config.max_retries, written) => {
                    retries += 1;
                    self.backoff(key, retries, &e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Calculate exponential backoff delay: 2^retries seconds, capped at MAX_RETRY_DELAY_SECS.
fn exponential_backoff_delay(retries: u32) -> Duration {
    let secs = (1u64 << retries.min(16)).min(MAX_RETRY_DELAY_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_tap() {
        let mut tap = TapConfig::new("heap-export");
        tap.endpoint_url = Some("http://localhost:9000".to_string());
        tap.force_path_style = true;
        let config = S3StoreConfig::from_tap(&tap);
        assert_eq!(config.bucket, "heap-export");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.max_retries, 3);
        assert!(config.force_path_style);
    }

    #[test]
    fn test_retry_only_before_first_byte() {
        let storage = HeapSyncError::Storage("connection reset".into());
        assert!(retry_allowed(&storage, 0, 3, 0));
        assert!(retry_allowed(&storage, 2, 3, 0));
        assert!(!retry_allowed(&storage, 3, 3, 0));
        // A partially written scratch file cannot be rewound
        assert!(!retry_allowed(&storage, 0, 3, 4096));

        let missing = HeapSyncError::NotFound("s3://heap/sync_1/t/part-00000-a.avro".into());
        assert!(!retry_allowed(&missing, 0, 3, 0));
        let write = HeapSyncError::Sink("disk full".into());
        assert!(!retry_allowed(&write, 0, 3, 0));
    }

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(exponential_backoff_delay(1), Duration::from_secs(2));
        assert_eq!(exponential_backoff_delay(2), Duration::from_secs(4));
        assert_eq!(exponential_backoff_delay(3), Duration::from_secs(8));
        assert_eq!(exponential_backoff_delay(6), Duration::from_secs(64));
        // Should cap at 64 seconds
        assert_eq!(exponential_backoff_delay(10), Duration::from_secs(64));
    }
}
