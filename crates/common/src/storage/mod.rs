//! Blob storage for uploaded books
//!
//! Provides:
//! - `BlobStore` trait used by the library service and the ingestion pipeline
//! - S3 implementation (works against LocalStack / MinIO via endpoint override)
//! - In-memory implementation for tests
//!
//! Blobs are addressed by locators of the form `s3://{bucket}/{key}`. Virtual-hosted
//! (`https://{bucket}.s3.{region}.amazonaws.com/{key}`) and path-style
//! (`https://{host}/{bucket}/{key}`) URLs are accepted when parsing.

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Storage for original book files
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the locator
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Fetch the full contents addressed by `locator`.
    /// Returns `AppError::BlobNotFound` when nothing is stored there.
    async fn download(&self, locator: &str) -> Result<Vec<u8>>;

    /// Remove the blob; deleting a missing blob is not an error
    async fn delete(&self, locator: &str) -> Result<()>;
}

/// Parsed blob locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocator {
    pub bucket: String,
    pub key: String,
}

impl BlobLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse an `s3://` locator or an S3 `https://` URL
    pub fn parse(locator: &str) -> Result<Self> {
        let invalid = || AppError::InvalidFormat {
            message: format!("unrecognized blob locator: {}", locator),
        };

        if let Some(rest) = locator.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
            if bucket.is_empty() || key.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::new(bucket, key));
        }

        let url = reqwest::Url::parse(locator).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }
        let host = url.host_str().ok_or_else(invalid)?;
        let path = url.path().trim_start_matches('/');

        // Virtual-hosted style: bucket is the first label of an *.s3.* host
        if let Some((bucket, _)) = host.split_once(".s3.") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::new(bucket, path));
        }

        // Path style: first segment is the bucket
        let (bucket, key) = path.split_once('/').ok_or_else(invalid)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(bucket, key))
    }
}

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Object key for a newly uploaded book: `books/{campaignId}/{uuid}_{fileName}`.
///
/// Characters outside `[A-Za-z0-9._-]` in the file name are replaced with `_`
/// so the key never needs URL escaping.
pub fn book_object_key(campaign_id: uuid::Uuid, file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!("books/{}/{}_{}", campaign_id, uuid::Uuid::new_v4(), safe)
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    /// Build a client from the default AWS credential chain plus overrides
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(ref region) = config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(ref endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        info!(bucket = %config.bucket, "S3 blob store initialised");

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        })
    }

    /// Create with an existing client
    pub fn with_client(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::BlobStorage {
                message: format!("Failed to upload {}: {}", key, e),
            })?;

        let locator = BlobLocator::new(&self.bucket, key).to_string();
        debug!(locator = %locator, size, "Blob uploaded");
        Ok(locator)
    }

    async fn download(&self, locator: &str) -> Result<Vec<u8>> {
        let parsed = BlobLocator::parse(locator)?;

        let output = self
            .client
            .get_object()
            .bucket(&parsed.bucket)
            .key(&parsed.key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    AppError::BlobNotFound {
                        locator: locator.to_string(),
                    }
                } else {
                    AppError::BlobStorage {
                        message: format!("Failed to download {}: {}", locator, e),
                    }
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| AppError::BlobStorage {
                message: format!("Failed to read {}: {}", locator, e),
            })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, locator: &str) -> Result<()> {
        let parsed = BlobLocator::parse(locator)?;

        self.client
            .delete_object()
            .bucket(&parsed.bucket)
            .key(&parsed.key)
            .send()
            .await
            .map_err(|e| AppError::BlobStorage {
                message: format!("Failed to delete {}: {}", locator, e),
            })?;

        debug!(locator = %locator, "Blob deleted");
        Ok(())
    }
}

/// In-memory blob store for testing
pub struct MemoryBlobStore {
    bucket: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store bytes directly and return the locator
    pub fn put(&self, key: &str, bytes: impl Into<Vec<u8>>) -> String {
        let locator = BlobLocator::new(&self.bucket, key).to_string();
        self.objects().insert(locator.clone(), bytes.into());
        locator
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.objects().contains_key(locator)
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("scribe-books")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        Ok(self.put(key, bytes))
    }

    async fn download(&self, locator: &str) -> Result<Vec<u8>> {
        let canonical = BlobLocator::parse(locator)?.to_string();
        self.objects()
            .get(&canonical)
            .cloned()
            .ok_or_else(|| AppError::BlobNotFound {
                locator: locator.to_string(),
            })
    }

    async fn delete(&self, locator: &str) -> Result<()> {
        let canonical = BlobLocator::parse(locator)?.to_string();
        self.objects().remove(&canonical);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_locator() {
        let loc = BlobLocator::parse("s3://scribe-books/books/abc/x_manual.pdf").unwrap();
        assert_eq!(loc.bucket, "scribe-books");
        assert_eq!(loc.key, "books/abc/x_manual.pdf");
        assert_eq!(loc.to_string(), "s3://scribe-books/books/abc/x_manual.pdf");
    }

    #[test]
    fn test_parse_https_locators() {
        let virtual_hosted =
            BlobLocator::parse("https://scribe-books.s3.us-east-1.amazonaws.com/books/a.pdf")
                .unwrap();
        assert_eq!(virtual_hosted, BlobLocator::new("scribe-books", "books/a.pdf"));

        let path_style = BlobLocator::parse("http://localhost:4566/scribe-books/books/a.pdf")
            .unwrap();
        assert_eq!(path_style, BlobLocator::new("scribe-books", "books/a.pdf"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BlobLocator::parse("s3://bucket-only").is_err());
        assert!(BlobLocator::parse("ftp://host/bucket/key").is_err());
        assert!(BlobLocator::parse("not a url").is_err());
    }

    #[test]
    fn test_book_object_key_is_url_safe() {
        let campaign = uuid::Uuid::new_v4();
        let key = book_object_key(campaign, "Player's Handbook (5e).pdf");

        assert!(key.starts_with(&format!("books/{}/", campaign)));
        assert!(key.ends_with("_Player_s_Handbook__5e_.pdf"));
        assert_ne!(key, book_object_key(campaign, "Player's Handbook (5e).pdf"));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_missing() {
        let store = MemoryBlobStore::default();
        let locator = store
            .upload("books/c/b.pdf", b"%PDF".to_vec(), "application/pdf")
            .await
            .unwrap();

        assert_eq!(store.download(&locator).await.unwrap(), b"%PDF".to_vec());

        store.delete(&locator).await.unwrap();
        let missing = store.download(&locator).await;
        assert!(matches!(missing, Err(AppError::BlobNotFound { .. })));
        store.delete(&locator).await.unwrap();
    }
}
