use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::info;

use super::transfer::{TransferError, copy_bounded};

/// Read increment when streaming a blob to local disk
const DOWNLOAD_CHUNK_SIZE: usize = 8192;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Canonical `scheme://bucket/object` reference to a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobLocator {
    scheme: String,
    bucket: String,
    object: String,
}

impl BlobLocator {
    pub fn new(scheme: &str, bucket: &str, object: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn uri(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.bucket, self.object)
    }
}

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.object)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to upload {object} to {bucket}: {source}")]
    Upload {
        bucket: String,
        object: String,
        source: BoxError,
    },

    #[error("Failed to download {bucket}/{object}: {source}")]
    Download {
        bucket: String,
        object: String,
        source: BoxError,
    },

    #[error("Failed to stat {bucket}/{object}: {source}")]
    Stat {
        bucket: String,
        object: String,
        source: BoxError,
    },

    #[error("Object {bucket}/{object} not found")]
    NotFound { bucket: String, object: String },

    #[error("Invalid object name '{0}'")]
    InvalidName(String),

    /// Blob turned out larger than the caller's cap while streaming
    #[error(transparent)]
    TooLarge(TransferError),

    #[error("Downloaded file is empty: {}", .0.display())]
    EmptyObject(PathBuf),

    #[error("Local file error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Blob store addressed by bucket + object name. Single attempt per call, no retries.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn locator(&self, bucket: &str, object: &str) -> BlobLocator;

    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        object: &str,
    ) -> Result<BlobLocator, StorageError>;

    /// Streams the blob to `local_path` and returns its length.
    ///
    /// Never writes more than `max_bytes`; empty results are errors.
    async fn download(
        &self,
        bucket: &str,
        object: &str,
        local_path: &Path,
        max_bytes: u64,
    ) -> Result<u64, StorageError>;

    async fn stat(&self, bucket: &str, object: &str) -> Result<ObjectMetadata, StorageError>;

    async fn health_check(&self, bucket: &str) -> bool;
}

/// Writes `stream` to `local_path` through the capped copy
async fn write_bounded<S, E>(
    stream: S,
    bucket: &str,
    object: &str,
    local_path: &Path,
    max_bytes: u64,
) -> Result<u64, StorageError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let mut file = tokio::fs::File::create(local_path)
        .await
        .map_err(|source| StorageError::Io {
            path: local_path.to_path_buf(),
            source,
        })?;

    let written = copy_bounded(stream, &mut file, max_bytes, DOWNLOAD_CHUNK_SIZE)
        .await
        .map_err(|e| match e {
            TransferError::Write(source) => StorageError::Io {
                path: local_path.to_path_buf(),
                source,
            },
            TransferError::TransferFailed(source) => StorageError::Download {
                bucket: bucket.to_string(),
                object: object.to_string(),
                source,
            },
            too_large => StorageError::TooLarge(too_large),
        })?;

    if written == 0 {
        return Err(StorageError::EmptyObject(local_path.to_path_buf()));
    }
    Ok(written)
}

fn guess_content_type(object: &str) -> String {
    mime_guess::from_path(object)
        .first_or_octet_stream()
        .to_string()
}

pub struct S3ObjectStore {
    client: Client,
    scheme: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, scheme: String) -> Self {
        Self { client, scheme }
    }

}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn locator(&self, bucket: &str, object: &str) -> BlobLocator {
        BlobLocator::new(&self.scheme, bucket, object)
    }

    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        object: &str,
    ) -> Result<BlobLocator, StorageError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Upload {
                bucket: bucket.to_string(),
                object: object.to_string(),
                source: Box::new(e),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(object)
            .content_type(guess_content_type(object))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    "S3 put_object failed: bucket={}, key={}, error={:?}",
                    bucket,
                    object,
                    e
                );
                StorageError::Upload {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    source: Box::new(e),
                }
            })?;

        info!("Successfully uploaded {} to {}", object, bucket);
        Ok(self.locator(bucket, object))
    }

    async fn download(
        &self,
        bucket: &str,
        object: &str,
        local_path: &Path,
        max_bytes: u64,
    ) -> Result<u64, StorageError> {
        let res = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await;

        let output = match res {
            Ok(output) => output,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(StorageError::NotFound {
                        bucket: bucket.to_string(),
                        object: object.to_string(),
                    });
                }
                return Err(StorageError::Download {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    source: Box::new(service_error),
                });
            }
        };

        let body = ReaderStream::with_capacity(output.body.into_async_read(), DOWNLOAD_CHUNK_SIZE);
        write_bounded(body, bucket, object, local_path, max_bytes).await
    }

    async fn stat(&self, bucket: &str, object: &str) -> Result<ObjectMetadata, StorageError> {
        let res = self
            .client
            .head_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await;

        match res {
            Ok(head) => Ok(ObjectMetadata {
                size: head.content_length.unwrap_or(0).max(0) as u64,
                content_type: head.content_type,
            }),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Err(StorageError::NotFound {
                        bucket: bucket.to_string(),
                        object: object.to_string(),
                    })
                } else {
                    Err(StorageError::Stat {
                        bucket: bucket.to_string(),
                        object: object.to_string(),
                        source: Box::new(service_error),
                    })
                }
            }
        }
    }

    async fn health_check(&self, bucket: &str) -> bool {
        self.client.head_bucket().bucket(bucket).send().await.is_ok()
    }
}

/// Buckets as directories under a root. Used for local development and tests.
pub struct LocalObjectStore {
    root: PathBuf,
    scheme: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, scheme: &str) -> Self {
        Self {
            root: root.into(),
            scheme: scheme.to_string(),
        }
    }

    fn blob_path(&self, bucket: &str, object: &str) -> Result<PathBuf, StorageError> {
        let safe = |part: &str| {
            !part.is_empty()
                && Path::new(part)
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
        };
        if !safe(bucket) || bucket.contains('/') {
            return Err(StorageError::InvalidName(bucket.to_string()));
        }
        if !safe(object) {
            return Err(StorageError::InvalidName(object.to_string()));
        }
        Ok(self.root.join(bucket).join(object))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn locator(&self, bucket: &str, object: &str) -> BlobLocator {
        BlobLocator::new(&self.scheme, bucket, object)
    }

    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        object: &str,
    ) -> Result<BlobLocator, StorageError> {
        let target = self.blob_path(bucket, object)?;
        let upload_err = |e: std::io::Error| StorageError::Upload {
            bucket: bucket.to_string(),
            object: object.to_string(),
            source: Box::new(e),
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(upload_err)?;
        }
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(upload_err)?;

        info!("Successfully uploaded {} to {}", object, bucket);
        Ok(self.locator(bucket, object))
    }

    async fn download(
        &self,
        bucket: &str,
        object: &str,
        local_path: &Path,
        max_bytes: u64,
    ) -> Result<u64, StorageError> {
        let source = self.blob_path(bucket, object)?;
        let file = match tokio::fs::File::open(&source).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                });
            }
            Err(e) => {
                return Err(StorageError::Download {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    source: Box::new(e),
                });
            }
        };

        let body = ReaderStream::with_capacity(file, DOWNLOAD_CHUNK_SIZE);
        write_bounded(body, bucket, object, local_path, max_bytes).await
    }

    async fn stat(&self, bucket: &str, object: &str) -> Result<ObjectMetadata, StorageError> {
        let path = self.blob_path(bucket, object)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ObjectMetadata {
                size: meta.len(),
                content_type: Some(guess_content_type(object)),
            }),
            Ok(_) => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            }),
            Err(e) => Err(StorageError::Stat {
                bucket: bucket.to_string(),
                object: object.to_string(),
                source: Box::new(e),
            }),
        }
    }

    async fn health_check(&self, _bucket: &str) -> bool {
        tokio::fs::create_dir_all(&self.root).await.is_ok()
    }
}
