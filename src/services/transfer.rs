use crate::config::PipelineConfig;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::storage::BoxError;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Declared or observed size is over the cap
    #[error("{}", too_large_message(.declared, .limit))]
    TooLarge { limit: u64, declared: Option<u64> },

    #[error("Failed to download video: {0}")]
    TransferFailed(#[source] BoxError),

    #[error("Failed to write downloaded data: {0}")]
    Write(#[source] std::io::Error),
}

fn too_large_message(declared: &Option<u64>, limit: &u64) -> String {
    match declared {
        Some(size) => format!("File too large: {} bytes (limit {} bytes)", size, limit),
        None => format!("File size exceeds limit during download ({} bytes)", limit),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub content_type: Option<String>,
}

/// Streams `stream` into `writer` in `chunk_size` increments.
///
/// The running total is checked before every increment is written, so the
/// writer never receives more than `max_bytes`. On `TooLarge` the writer holds
/// a partial prefix that the caller must discard.
pub async fn copy_bounded<S, E, W>(
    stream: S,
    writer: &mut W,
    max_bytes: u64,
    chunk_size: usize,
) -> Result<u64, TransferError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
    W: AsyncWrite + Unpin,
{
    let mut stream = std::pin::pin!(stream);
    let mut total: u64 = 0;

    while let Some(next) = stream.next().await {
        let chunk = next.map_err(|e| TransferError::TransferFailed(e.into()))?;
        for piece in chunk.chunks(chunk_size.max(1)) {
            let len = piece.len() as u64;
            if total + len > max_bytes {
                return Err(TransferError::TooLarge {
                    limit: max_bytes,
                    declared: None,
                });
            }
            writer.write_all(piece).await.map_err(TransferError::Write)?;
            total += len;
        }
    }

    writer.flush().await.map_err(TransferError::Write)?;
    Ok(total)
}

pub(crate) fn is_video_content_type(content_type: &str) -> bool {
    content_type
        .parse::<mime::Mime>()
        .map(|m| m.type_() == mime::VIDEO)
        .unwrap_or(false)
}

/// HTTP source fetcher with a whole-transfer timeout
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransferError::TransferFailed(Box::new(e)))?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size,
        })
    }

    pub async fn fetch_to_path(
        &self,
        url: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> Result<TransferReport, TransferError> {
        info!("Starting download from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransferError::TransferFailed(Box::new(e)))?;

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(size) = declared {
            if size > max_bytes {
                return Err(TransferError::TooLarge {
                    limit: max_bytes,
                    declared: Some(size),
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        if !content_type
            .as_deref()
            .map(is_video_content_type)
            .unwrap_or(false)
        {
            warn!(
                "Unexpected content type: {}",
                content_type.as_deref().unwrap_or("<none>")
            );
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(TransferError::Write)?;
        let bytes = copy_bounded(response.bytes_stream(), &mut file, max_bytes, self.chunk_size)
            .await?;

        info!("Successfully downloaded {} bytes to {}", bytes, dest.display());
        Ok(TransferReport {
            bytes,
            content_type,
        })
    }
}
