use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::PipelineConfig;

use super::storage::BlobLocator;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to reach next stage at {url}: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("Next stage at {url} returned {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },
}

#[derive(Debug, Serialize)]
struct NextStagePayload<'a> {
    #[serde(rename = "videoUrl")]
    video_url: &'a str,
}

/// Hands a persisted result to the next pipeline stage
#[async_trait]
pub trait NextStageNotifier: Send + Sync {
    async fn notify(&self, result: &BlobLocator) -> Result<(), NotifyError>;
}

/// Logs the hand-off without calling anything
pub struct LogNotifier;

#[async_trait]
impl NextStageNotifier for LogNotifier {
    async fn notify(&self, result: &BlobLocator) -> Result<(), NotifyError> {
        info!("Would trigger crop-video function with: {}", result);
        Ok(())
    }
}

/// POSTs `{"videoUrl": "<locator>"}` to the next stage
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: String, user_agent: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|source| NotifyError::Request {
                url: url.clone(),
                source,
            })?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NextStageNotifier for HttpNotifier {
    async fn notify(&self, result: &BlobLocator) -> Result<(), NotifyError> {
        let uri = result.uri();
        let response = self
            .client
            .post(&self.url)
            .json(&NextStagePayload { video_url: &uri })
            .send()
            .await
            .map_err(|source| NotifyError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                url: self.url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        info!("Triggered next stage at {} with {}", self.url, uri);
        Ok(())
    }
}

/// Factory function to create the configured notifier
pub fn create_notifier(config: &PipelineConfig) -> Result<Arc<dyn NextStageNotifier>, NotifyError> {
    match &config.next_stage_url {
        Some(url) => Ok(Arc::new(HttpNotifier::new(url.clone(), &config.user_agent)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
