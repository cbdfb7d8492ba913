use std::io::Cursor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use super::error::{StorageError, classify_status};
use super::traits::{BoxReader, Listing, ObjectEntry, ObjectHead, ObjectStore};
use crate::config::S3Config;

/// Object store backed by any S3-compatible endpoint.
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    pub fn new(config: &S3Config) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };
        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Permission(format!("invalid S3 credentials: {e}")))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials).map_err(map_s3_error)?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }

        tracing::info!(
            endpoint = %config.endpoint,
            bucket = %config.bucket,
            path_style = config.path_style,
            "S3 object store configured"
        );
        Ok(Self { bucket })
    }
}

/// Only transport failures are retryable. Parse, signing and local
/// credential errors will fail the same way again.
fn map_s3_error(err: S3Error) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(status, body) => classify_status(status, body),
        S3Error::Io(e) => StorageError::Io(e),
        S3Error::Reqwest(e) if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() => {
            StorageError::Transient(e.to_string())
        }
        S3Error::Credentials(e) => StorageError::Permission(e.to_string()),
        other => StorageError::Unknown(other.to_string()),
    }
}

fn check_status(status: u16, key: &str) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(classify_status(status, key))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_stream(
        &self,
        key: &str,
        mut reader: BoxReader,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let response = self
            .bucket
            .put_object_stream_with_content_type(&mut reader, key, content_type)
            .await
            .map_err(map_s3_error)?;
        check_status(response.status_code(), key)?;
        Ok(response.uploaded_bytes() as u64)
    }

    /// The response body is buffered before it is handed out.
    async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(map_s3_error)?;
        check_status(response.status_code(), key)?;
        Ok(Box::new(Cursor::new(response.to_vec())))
    }

    async fn head(&self, key: &str) -> Result<ObjectHead, StorageError> {
        let (head, status) = self.bucket.head_object(key).await.map_err(map_s3_error)?;
        check_status(status, key)?;

        Ok(ObjectHead {
            key: key.to_string(),
            size: head.content_length.unwrap_or_default().max(0) as u64,
            content_type: head.content_type,
            etag: head.e_tag.map(|t| t.trim_matches('"').to_string()),
            last_modified: head
                .last_modified
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }

    async fn list(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing, StorageError> {
        let pages = self
            .bucket
            .list(prefix.to_string(), delimiter.map(str::to_string))
            .await
            .map_err(map_s3_error)?;

        let mut listing = Listing::default();
        for page in pages {
            listing
                .objects
                .extend(page.contents.into_iter().map(|object| ObjectEntry {
                    last_modified: DateTime::parse_from_rfc3339(&object.last_modified)
                        .ok()
                        .map(|t| t.with_timezone(&Utc)),
                    key: object.key,
                    size: object.size,
                }));
            if let Some(prefixes) = page.common_prefixes {
                listing
                    .common_prefixes
                    .extend(prefixes.into_iter().map(|p| p.prefix));
            }
        }
        listing.objects.sort_by(|a, b| a.key.cmp(&b.key));
        listing.common_prefixes.sort();
        listing.common_prefixes.dedup();
        Ok(listing)
    }

    /// S3 reports success for missing keys, so existence is checked first.
    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match self.head(key).await {
            Ok(_) => {}
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        let response = self.bucket.delete_object(key).await.map_err(map_s3_error)?;
        check_status(response.status_code(), key)?;
        Ok(true)
    }
}
