use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which transform the pipeline runs between the raw and upscaled uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpscaleMode {
    /// Copy the input unchanged
    Passthrough,
    /// Delegate to the external super-resolution runner
    Model,
}

impl UpscaleMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "passthrough" | "copy" | "noop" => Some(Self::Passthrough),
            "model" | "realesrgan" | "real-esrgan" => Some(Self::Model),
            _ => None,
        }
    }
}

/// Where blobs live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local,
}

/// Settings for the external model runner
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Runner executable (default: "realesrgan-runner")
    pub runner: String,

    /// Locally provisioned weights file
    pub model_path: PathBuf,

    /// Expected SHA-256 of the weights, hex encoded
    pub model_sha256: Option<String>,

    /// Fixed output scale (default: 4)
    pub scale: u32,

    /// Tile size, 0 disables tiling (default: 0)
    pub tile: u32,

    /// Overlap between tiles in pixels (default: 10)
    pub tile_pad: u32,

    /// Border padding applied before inference (default: 0)
    pub pre_pad: u32,

    /// "cpu" or "cuda:<index>" (default: "cpu")
    pub device: String,

    /// fp16 inference, only honoured on accelerators (default: false)
    pub half_precision: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            runner: "realesrgan-runner".to_string(),
            model_path: PathBuf::from("weights/RealESRGAN_x4plus.pth"),
            model_sha256: None,
            scale: 4,
            tile: 0,
            tile_pad: 10,
            pre_pad: 0,
            device: "cpu".to_string(),
            half_precision: false,
        }
    }
}

/// Object storage connection settings
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Backend selection (default: s3)
    pub backend: StorageBackend,

    /// Root directory for the local backend
    pub local_root: PathBuf,

    /// Custom endpoint for S3-compatible providers (MinIO, GCS interop)
    pub endpoint: Option<String>,

    /// Region (default: "us-east-1")
    pub region: String,

    pub access_key: Option<String>,
    pub secret_key: Option<String>,

    /// Scheme used when rendering locators, e.g. "s3" or "gs"
    pub locator_scheme: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            local_root: PathBuf::from("./data/buckets"),
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            locator_scheme: "s3".to_string(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bucket receiving the original download (default: "vflow-pipeline-to-upscale")
    pub raw_bucket: String,

    /// Bucket receiving the transform output (default: "vflow-pipeline-upscaled")
    pub upscaled_bucket: String,

    /// Cap for URL-sourced downloads in bytes (default: 500 MB)
    pub max_url_download_size: u64,

    /// Cap for storage-event objects in bytes (default: 2000 MB)
    pub max_event_file_size: u64,

    /// Budget for a whole download (default: 300 s)
    pub download_timeout: Duration,

    /// Write increment while streaming (default: 8 KiB)
    pub chunk_size: usize,

    /// User-Agent sent with source fetches (default: "Video-Pipeline/1.0")
    pub user_agent: String,

    /// Directory for per-invocation scratch files (default: system temp dir)
    pub scratch_dir: PathBuf,

    /// Transform selection (default: passthrough)
    pub upscale_mode: UpscaleMode,

    pub model: ModelSettings,

    /// Endpoint of the next pipeline stage; unset means log only
    pub next_stage_url: Option<String>,

    pub storage: StorageSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_bucket: "vflow-pipeline-to-upscale".to_string(),
            upscaled_bucket: "vflow-pipeline-upscaled".to_string(),
            max_url_download_size: 500 * 1024 * 1024, // 500 MB
            max_event_file_size: 2000 * 1024 * 1024,  // 2000 MB
            download_timeout: Duration::from_secs(300),
            chunk_size: 8192,
            user_agent: "Video-Pipeline/1.0".to_string(),
            scratch_dir: env::temp_dir(),
            upscale_mode: UpscaleMode::Passthrough,
            model: ModelSettings::default(),
            next_stage_url: None,
            storage: StorageSettings::default(),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();
        let model_default = default.model.clone();
        let storage_default = default.storage.clone();

        Self {
            raw_bucket: non_empty("RAW_BUCKET").unwrap_or(default.raw_bucket),

            upscaled_bucket: non_empty("UPSCALED_BUCKET").unwrap_or(default.upscaled_bucket),

            max_url_download_size: parsed("MAX_URL_DOWNLOAD_SIZE")
                .unwrap_or(default.max_url_download_size),

            max_event_file_size: parsed("MAX_EVENT_FILE_SIZE")
                .unwrap_or(default.max_event_file_size),

            download_timeout: parsed("DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.download_timeout),

            chunk_size: parsed("DOWNLOAD_CHUNK_SIZE")
                .filter(|size: &usize| *size > 0)
                .unwrap_or(default.chunk_size),

            user_agent: non_empty("DOWNLOAD_USER_AGENT").unwrap_or(default.user_agent),

            scratch_dir: non_empty("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.scratch_dir),

            upscale_mode: env::var("UPSCALE_MODE")
                .ok()
                .and_then(|v| UpscaleMode::parse(&v))
                .unwrap_or(default.upscale_mode),

            model: ModelSettings {
                runner: non_empty("UPSCALE_RUNNER").unwrap_or(model_default.runner),
                model_path: non_empty("UPSCALE_MODEL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(model_default.model_path),
                model_sha256: non_empty("UPSCALE_MODEL_SHA256").map(|v| v.to_lowercase()),
                scale: model_default.scale,
                tile: parsed("UPSCALE_TILE").unwrap_or(model_default.tile),
                tile_pad: parsed("UPSCALE_TILE_PAD").unwrap_or(model_default.tile_pad),
                pre_pad: parsed("UPSCALE_PRE_PAD").unwrap_or(model_default.pre_pad),
                device: non_empty("UPSCALE_DEVICE").unwrap_or(model_default.device),
                half_precision: flag("UPSCALE_HALF").unwrap_or(model_default.half_precision),
            },

            next_stage_url: non_empty("NEXT_STAGE_URL"),

            storage: StorageSettings {
                backend: match env::var("STORAGE_BACKEND").map(|v| v.to_lowercase()) {
                    Ok(v) if v == "local" => StorageBackend::Local,
                    Ok(v) if v == "s3" => StorageBackend::S3,
                    _ => storage_default.backend,
                },
                local_root: non_empty("LOCAL_STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(storage_default.local_root),
                endpoint: non_empty("S3_ENDPOINT"),
                region: non_empty("S3_REGION").unwrap_or(storage_default.region),
                access_key: non_empty("S3_ACCESS_KEY"),
                secret_key: non_empty("S3_SECRET_KEY"),
                locator_scheme: non_empty("LOCATOR_SCHEME")
                    .unwrap_or(storage_default.locator_scheme),
            },
        }
    }

    /// Create config for local development (filesystem buckets, passthrough transform)
    pub fn development() -> Self {
        Self {
            storage: StorageSettings {
                backend: StorageBackend::Local,
                locator_scheme: "file".to_string(),
                ..StorageSettings::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_url_download_size, 500 * 1024 * 1024);
        assert_eq!(config.max_event_file_size, 2000 * 1024 * 1024);
        assert_eq!(config.download_timeout, Duration::from_secs(300));
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.raw_bucket, "vflow-pipeline-to-upscale");
        assert_eq!(config.upscaled_bucket, "vflow-pipeline-upscaled");
        assert_eq!(config.upscale_mode, UpscaleMode::Passthrough);
        assert_eq!(config.model.scale, 4);
    }

    #[test]
    fn test_development_config() {
        let config = PipelineConfig::development();
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.storage.locator_scheme, "file");
        assert!(config.next_stage_url.is_none());
    }

    #[test]
    fn test_upscale_mode_aliases() {
        assert_eq!(UpscaleMode::parse("Model"), Some(UpscaleMode::Model));
        assert_eq!(UpscaleMode::parse("real-esrgan"), Some(UpscaleMode::Model));
        assert_eq!(UpscaleMode::parse(" copy "), Some(UpscaleMode::Passthrough));
        assert_eq!(UpscaleMode::parse("gpu"), None);
    }

    #[test]
    fn test_from_env_bucket_override() {
        unsafe { env::set_var("UPSCALED_BUCKET", "custom-upscaled") };
        let config = PipelineConfig::from_env();
        unsafe { env::remove_var("UPSCALED_BUCKET") };
        assert_eq!(config.upscaled_bucket, "custom-upscaled");
    }
}
