use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, info, info_span, warn};
use utoipa::ToSchema;

use crate::config::PipelineConfig;
use crate::utils::validation::{
    EventDecision, OutputNames, UpscaleRequest, ValidationError, validate_declared_size,
    validate_guessed_mime, validate_source_url, validate_storage_event, validate_upscale_request,
};

use super::notifier::NextStageNotifier;
use super::scratch::ScratchFile;
use super::storage::{BlobLocator, ObjectStore, StorageError};
use super::transfer::{HttpFetcher, TransferError, is_video_content_type};
use super::upscaler::{TransformError, Upscaler};

/// Position of an invocation in the stage sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Downloading,
    UploadingRaw,
    Transforming,
    UploadingResult,
    Notifying,
    Done,
    Failed(ErrorKind),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validating => write!(f, "validating"),
            Stage::Downloading => write!(f, "downloading"),
            Stage::UploadingRaw => write!(f, "uploading_raw"),
            Stage::Transforming => write!(f, "transforming"),
            Stage::UploadingResult => write!(f, "uploading_result"),
            Stage::Notifying => write!(f, "notifying"),
            Stage::Done => write!(f, "done"),
            Stage::Failed(kind) => write!(f, "failed({})", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    TooLarge,
    TransferFailed,
    Storage,
    Transform,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TooLarge => "too_large",
            ErrorKind::TransferFailed => "transfer_failed",
            ErrorKind::Storage => "storage",
            ErrorKind::Transform => "transform",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    TooLarge(String),

    #[error("{0}")]
    TransferFailed(#[source] TransferError),

    #[error("{0}")]
    Storage(StorageError),

    #[error("{0}")]
    Transform(#[from] TransformError),

    #[error("{0}")]
    Internal(String),
}

impl From<TransferError> for PipelineError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::TooLarge { .. } => PipelineError::TooLarge(err.to_string()),
            TransferError::Write(e) => {
                PipelineError::Internal(format!("Failed to write downloaded data: {}", e))
            }
            other => PipelineError::TransferFailed(other),
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::TooLarge(inner) => inner.into(),
            other => PipelineError::Storage(other),
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::TooLarge(_) => ErrorKind::TooLarge,
            PipelineError::TransferFailed(_) => ErrorKind::TransferFailed,
            PipelineError::Storage(_) => ErrorKind::Storage,
            PipelineError::Transform(_) => ErrorKind::Transform,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result of a URL-sourced run
#[derive(Debug, Clone)]
pub struct UpscaleOutcome {
    pub original: BlobLocator,
    pub upscaled: BlobLocator,
    pub filename: String,
    pub bytes: u64,
}

/// Result of an event-sourced run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Finished { upscaled: BlobLocator },
    Skipped(String),
}

fn advance(stage: &mut Stage, next: Stage) {
    info!("Stage: {}", next);
    *stage = next;
}

fn reserve(dir: &Path, label: &str, suffix: &str) -> Result<ScratchFile, PipelineError> {
    ScratchFile::reserve(dir, label, suffix)
        .map_err(|e| PipelineError::Internal(format!("Failed to reserve scratch file: {}", e)))
}

// Content sniffing is advisory; names and headers already gate the input.
fn sniff_container(path: &Path) {
    match infer::get_from_path(path) {
        Ok(Some(kind)) if kind.matcher_type() != infer::MatcherType::Video => {
            warn!(
                "Downloaded content looks like {} rather than video",
                kind.mime_type()
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Could not inspect {}: {}", path.display(), e),
    }
}

/// Drives one invocation through validate, download, transform, persist and notify.
///
/// Holds no per-invocation state; every run owns its scratch files and
/// releases them on every exit path.
pub struct UpscalePipeline {
    config: PipelineConfig,
    fetcher: HttpFetcher,
    storage: Arc<dyn ObjectStore>,
    upscaler: Arc<dyn Upscaler>,
    notifier: Arc<dyn NextStageNotifier>,
}

impl UpscalePipeline {
    pub fn new(
        config: PipelineConfig,
        storage: Arc<dyn ObjectStore>,
        upscaler: Arc<dyn Upscaler>,
        notifier: Arc<dyn NextStageNotifier>,
    ) -> Result<Self, TransferError> {
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self {
            config,
            fetcher,
            storage,
            upscaler,
            notifier,
        })
    }

    /// HTTP ingress: validates the raw request, then runs the URL flow
    pub async fn process_request(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<UpscaleOutcome, PipelineError> {
        info!("Stage: {}", Stage::Validating);
        let request = validate_upscale_request(content_type, body)?;
        self.run_url(&request).await
    }

    /// Same flow for a bare URL (CLI one-shot)
    pub async fn process_source_url(&self, source_url: &str) -> Result<UpscaleOutcome, PipelineError> {
        info!("Stage: {}", Stage::Validating);
        let request = validate_source_url(source_url)?;
        self.run_url(&request).await
    }

    pub async fn run_url(&self, request: &UpscaleRequest) -> Result<UpscaleOutcome, PipelineError> {
        let span = info_span!("upscale", ingress = "url", source = %request.source_url);
        async {
            let mut stage = Stage::Validating;
            let result = self.url_stages(&request.source_url, &mut stage).await;
            match &result {
                Ok(outcome) => info!(
                    "Video upscaling completed successfully: {} -> {} ({} bytes)",
                    outcome.original, outcome.upscaled, outcome.bytes
                ),
                Err(e) => {
                    let failed_at = stage;
                    advance(&mut stage, Stage::Failed(e.kind()));
                    warn!("Failed during {}: {}", failed_at, e);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn url_stages(
        &self,
        source_url: &str,
        stage: &mut Stage,
    ) -> Result<UpscaleOutcome, PipelineError> {
        let names = OutputNames::from_source_url(source_url);
        let scratch_dir = &self.config.scratch_dir;
        let raw = reserve(scratch_dir, "raw", &names.extension)?;
        let upscaled = reserve(scratch_dir, "upscaled", &names.extension)?;

        advance(stage, Stage::Downloading);
        let report = self
            .fetcher
            .fetch_to_path(source_url, raw.path(), self.config.max_url_download_size)
            .await?;
        if report.bytes == 0 {
            return Err(StorageError::EmptyObject(raw.path().to_path_buf()).into());
        }
        sniff_container(raw.path());

        advance(stage, Stage::UploadingRaw);
        let original = self
            .storage
            .upload(raw.path(), &self.config.raw_bucket, &names.original)
            .await?;
        info!("Uploaded original to {}", original);

        advance(stage, Stage::Transforming);
        self.upscaler
            .upscale(raw.path(), upscaled.path(), self.config.model.scale)
            .await?;

        advance(stage, Stage::UploadingResult);
        let result = self
            .storage
            .upload(upscaled.path(), &self.config.upscaled_bucket, &names.upscaled)
            .await?;
        info!("Uploaded upscaled video to {}", result);

        advance(stage, Stage::Notifying);
        self.notify(&result).await;

        advance(stage, Stage::Done);
        Ok(UpscaleOutcome {
            original,
            upscaled: result,
            filename: names.upscaled,
            bytes: report.bytes,
        })
    }

    /// Storage-event ingress. The source already lives in storage, so the raw upload is skipped.
    pub async fn run_event(&self, payload: &Value) -> Result<EventOutcome, PipelineError> {
        let span = info_span!("upscale", ingress = "event");
        async {
            let mut stage = Stage::Validating;
            info!("Stage: {}", stage);
            let result = self.event_stages(payload, &mut stage).await;
            match &result {
                Ok(EventOutcome::Finished { upscaled }) => {
                    info!("Function finished successfully: {}", upscaled)
                }
                Ok(EventOutcome::Skipped(reason)) => info!("Skipped: {}", reason),
                Err(e) => {
                    let failed_at = stage;
                    advance(&mut stage, Stage::Failed(e.kind()));
                    warn!("Failed during {}: {}", failed_at, e);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn event_stages(
        &self,
        payload: &Value,
        stage: &mut Stage,
    ) -> Result<EventOutcome, PipelineError> {
        let object = match validate_storage_event(payload)? {
            EventDecision::Skip { reason } => return Ok(EventOutcome::Skipped(reason)),
            EventDecision::Process(object) => object,
        };

        // Results land in the upscaled bucket and would otherwise retrigger this handler.
        if object.bucket == self.config.upscaled_bucket {
            return Ok(EventOutcome::Skipped(format!(
                "Object already in output bucket {}",
                object.bucket
            )));
        }

        validate_guessed_mime(&object.name)?;
        info!("Processing storage event for {}/{}", object.bucket, object.name);
        if let Some(content_type) = object.content_type.as_deref() {
            if !is_video_content_type(content_type) {
                warn!("Event reports non-video content type: {}", content_type);
            }
        }

        let max_size = self.config.max_event_file_size;
        let size = match object.size {
            Some(size) => size,
            None => self.storage.stat(&object.bucket, &object.name).await?.size,
        };
        validate_declared_size(size, max_size).map_err(|e| PipelineError::TooLarge(e.message))?;

        let names = OutputNames::from_object_name(&object.name);
        let scratch_dir = &self.config.scratch_dir;
        let raw = reserve(scratch_dir, "raw", &names.extension)?;
        let upscaled = reserve(scratch_dir, "upscaled", &names.extension)?;

        advance(stage, Stage::Downloading);
        // The declared size is advisory; the stream itself is capped too.
        let bytes = self
            .storage
            .download(&object.bucket, &object.name, raw.path(), max_size)
            .await?;
        info!("Downloaded {} bytes from {}/{}", bytes, object.bucket, object.name);
        sniff_container(raw.path());

        advance(stage, Stage::Transforming);
        self.upscaler
            .upscale(raw.path(), upscaled.path(), self.config.model.scale)
            .await?;

        advance(stage, Stage::UploadingResult);
        let result = self
            .storage
            .upload(upscaled.path(), &self.config.upscaled_bucket, &names.upscaled)
            .await?;
        info!("Uploaded upscaled video to {}", result);

        advance(stage, Stage::Notifying);
        self.notify(&result).await;

        advance(stage, Stage::Done);
        Ok(EventOutcome::Finished { upscaled: result })
    }

    async fn notify(&self, result: &BlobLocator) {
        if let Err(e) = self.notifier.notify(result).await {
            warn!("Next stage notification failed for {}: {}", result, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::{LogNotifier, NotifyError};
    use crate::services::storage::LocalObjectStore;
    use crate::services::upscaler::{FailingUpscaler, PassthroughUpscaler};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _root: TempDir,
        scratch: std::path::PathBuf,
        buckets: std::path::PathBuf,
        pipeline: UpscalePipeline,
    }

    struct RefusingNotifier;

    #[async_trait]
    impl NextStageNotifier for RefusingNotifier {
        async fn notify(&self, result: &BlobLocator) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected {
                url: "http://next".to_string(),
                status: 500,
                body: result.uri(),
            })
        }
    }

    fn harness(upscaler: Arc<dyn Upscaler>, notifier: Arc<dyn NextStageNotifier>) -> Harness {
        harness_with_event_cap(upscaler, notifier, PipelineConfig::default().max_event_file_size)
    }

    fn harness_with_event_cap(
        upscaler: Arc<dyn Upscaler>,
        notifier: Arc<dyn NextStageNotifier>,
        max_event_file_size: u64,
    ) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        let buckets = root.path().join("buckets");
        std::fs::create_dir_all(&scratch).unwrap();

        let config = PipelineConfig {
            scratch_dir: scratch.clone(),
            max_event_file_size,
            ..PipelineConfig::development()
        };
        let storage = Arc::new(LocalObjectStore::new(buckets.clone(), "file"));
        let pipeline = UpscalePipeline::new(config, storage, upscaler, notifier).unwrap();
        Harness {
            _root: root,
            scratch,
            buckets,
            pipeline,
        }
    }

    fn seed(h: &Harness, bucket: &str, name: &str, data: &[u8]) {
        let path = h.buckets.join(bucket).join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn scratch_is_empty(h: &Harness) -> bool {
        std::fs::read_dir(&h.scratch).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_event_happy_path() {
        let h = harness(Arc::new(PassthroughUpscaler), Arc::new(LogNotifier));
        seed(&h, "incoming", "clips/a.mp4", b"not really a video");

        let outcome = h
            .pipeline
            .run_event(&json!({"bucket": "incoming", "name": "clips/a.mp4"}))
            .await
            .unwrap();

        let EventOutcome::Finished { upscaled } = outcome else {
            panic!("expected finished");
        };
        assert_eq!(upscaled.bucket(), "vflow-pipeline-upscaled");
        assert_eq!(upscaled.object(), "clips/a_upscaled.mp4");
        let stored = h
            .buckets
            .join("vflow-pipeline-upscaled")
            .join("clips/a_upscaled.mp4");
        assert_eq!(std::fs::read(stored).unwrap(), b"not really a video");
        assert!(scratch_is_empty(&h));
        // no raw upload for events
        assert!(!h.buckets.join("vflow-pipeline-to-upscale").exists());
    }

    #[tokio::test]
    async fn test_event_non_video_content_type_still_processed() {
        let h = harness(Arc::new(PassthroughUpscaler), Arc::new(LogNotifier));
        seed(&h, "incoming", "b.mov", b"mov bytes");

        let outcome = h
            .pipeline
            .run_event(&json!({
                "bucket": "incoming",
                "name": "b.mov",
                "contentType": "application/octet-stream"
            }))
            .await
            .unwrap();

        let EventOutcome::Finished { upscaled } = outcome else {
            panic!("expected finished");
        };
        assert_eq!(upscaled.object(), "b_upscaled.mov");
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn test_event_skips_unsupported_and_own_output() {
        let h = harness(Arc::new(PassthroughUpscaler), Arc::new(LogNotifier));

        let outcome = h
            .pipeline
            .run_event(&json!({"bucket": "incoming", "name": "photo.jpg"}))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EventOutcome::Skipped("Unsupported file type .jpg".to_string())
        );

        let outcome = h
            .pipeline
            .run_event(&json!({"bucket": "vflow-pipeline-upscaled", "name": "a_upscaled.mp4"}))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_event_declared_size_over_cap() {
        let h = harness(Arc::new(PassthroughUpscaler), Arc::new(LogNotifier));
        let err = h
            .pipeline
            .run_event(&json!({
                "bucket": "incoming",
                "name": "big.mov",
                "size": (3000u64 * 1024 * 1024).to_string()
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooLarge);
        assert!(err.to_string().contains("Maximum allowed: 2000MB"));
    }

    #[tokio::test]
    async fn test_event_understated_size_is_capped_while_streaming() {
        let h = harness_with_event_cap(Arc::new(PassthroughUpscaler), Arc::new(LogNotifier), 1024);
        seed(&h, "incoming", "a.mp4", &[5u8; 5000]);

        let err = h
            .pipeline
            .run_event(&json!({"bucket": "incoming", "name": "a.mp4", "size": "100"}))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TooLarge);
        assert!(err.to_string().contains("exceeds limit during download"));
        assert!(scratch_is_empty(&h));
        assert!(!h.buckets.join("vflow-pipeline-upscaled").exists());
    }

    #[tokio::test]
    async fn test_event_missing_object_is_storage_error() {
        let h = harness(Arc::new(PassthroughUpscaler), Arc::new(LogNotifier));
        let err = h
            .pipeline
            .run_event(&json!({"bucket": "incoming", "name": "gone.mp4"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn test_transform_failure_cleans_scratch() {
        let h = harness(Arc::new(FailingUpscaler), Arc::new(LogNotifier));
        seed(&h, "incoming", "a.mkv", b"frames");

        let err = h
            .pipeline
            .run_event(&json!({"bucket": "incoming", "name": "a.mkv", "size": 6}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert!(scratch_is_empty(&h));
        assert!(!h.buckets.join("vflow-pipeline-upscaled").exists());
    }

    #[tokio::test]
    async fn test_notify_failure_does_not_fail_run() {
        let h = harness(Arc::new(PassthroughUpscaler), Arc::new(RefusingNotifier));
        seed(&h, "incoming", "a.webm", b"frames");

        let outcome = h
            .pipeline
            .run_event(&json!({"data": {"bucket": "incoming", "name": "a.webm"}}))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Finished { .. }));
    }

    #[tokio::test]
    async fn test_invalid_request_is_validation_kind() {
        let h = harness(Arc::new(PassthroughUpscaler), Arc::new(LogNotifier));
        let err = h
            .pipeline
            .process_request(Some("application/json"), br#"{"sourceUrl": "ftp://x/y.mp4"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Invalid URL format");
    }

    #[test]
    fn test_transfer_error_classification() {
        let too_large: PipelineError = TransferError::TooLarge {
            limit: 1,
            declared: Some(2),
        }
        .into();
        assert_eq!(too_large.kind(), ErrorKind::TooLarge);

        let write: PipelineError =
            TransferError::Write(std::io::Error::other("disk full")).into();
        assert_eq!(write.kind(), ErrorKind::Internal);

        let failed: PipelineError = TransferError::TransferFailed("timeout".into()).into();
        assert_eq!(failed.kind(), ErrorKind::TransferFailed);
        assert_eq!(Stage::Failed(ErrorKind::TooLarge).to_string(), "failed(too_large)");
    }
}
