use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::{ModelSettings, PipelineConfig, UpscaleMode};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Upscale input not readable at {}: {source}", .path.display())]
    Input {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write upscaled output to {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Model weights not found at {}", .0.display())]
    MissingWeights(PathBuf),

    #[error("Model weights checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Invalid device '{0}', expected 'cpu' or 'cuda:<index>'")]
    InvalidDevice(String),

    #[error("Failed to launch upscale runner '{program}': {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error("Upscale runner exited with {status}: {stderr}")]
    RunnerFailed { status: String, stderr: String },

    #[error("Upscale runner produced no output at {}", .0.display())]
    EmptyOutput(PathBuf),
}

/// Turns one local media file into its upscaled counterpart
#[async_trait]
pub trait Upscaler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upscale(&self, input: &Path, output: &Path, scale: u32)
    -> Result<(), TransformError>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Byte-for-byte copy of the input
pub struct PassthroughUpscaler;

#[async_trait]
impl Upscaler for PassthroughUpscaler {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn upscale(
        &self,
        input: &Path,
        output: &Path,
        _scale: u32,
    ) -> Result<(), TransformError> {
        tokio::fs::metadata(input)
            .await
            .map_err(|source| TransformError::Input {
                path: input.to_path_buf(),
                source,
            })?;

        tokio::fs::copy(input, output)
            .await
            .map_err(|source| TransformError::Output {
                path: output.to_path_buf(),
                source,
            })?;

        info!(
            "Upscaling completed (placeholder): {} -> {}",
            input.display(),
            output.display()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl FromStr for Device {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|idx| idx.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| TransformError::InvalidDevice(s.to_string())),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{}", idx),
        }
    }
}

/// Runs the external super-resolution runner as a child process.
///
/// Weights are provisioned out of band; when a digest is configured the file
/// is hashed once and every run after that reuses the verdict.
pub struct ModelRunnerUpscaler {
    settings: ModelSettings,
    device: Device,
    weights_verified: OnceCell<()>,
}

impl ModelRunnerUpscaler {
    pub fn new(settings: ModelSettings) -> Result<Self, TransformError> {
        let device = settings.device.parse()?;
        Ok(Self {
            settings,
            device,
            weights_verified: OnceCell::new(),
        })
    }

    fn runner_args(&self, input: &Path, output: &Path, scale: u32) -> Vec<OsString> {
        let s = &self.settings;
        let mut args: Vec<OsString> = vec![
            "--input".into(),
            input.as_os_str().to_owned(),
            "--output".into(),
            output.as_os_str().to_owned(),
            "--model-path".into(),
            s.model_path.as_os_str().to_owned(),
            "--outscale".into(),
            scale.to_string().into(),
            "--device".into(),
            self.device.to_string().into(),
        ];

        if s.tile > 0 {
            args.push("--tile".into());
            args.push(s.tile.to_string().into());
            args.push("--tile-pad".into());
            args.push(s.tile_pad.to_string().into());
        }
        if s.pre_pad > 0 {
            args.push("--pre-pad".into());
            args.push(s.pre_pad.to_string().into());
        }
        // fp16 is not available on CPU
        if !(s.half_precision && self.device != Device::Cpu) {
            args.push("--fp32".into());
        }
        args
    }

    async fn verify_weights(&self) -> Result<(), TransformError> {
        self.weights_verified
            .get_or_try_init(|| self.check_weights())
            .await
            .map(|_| ())
    }

    async fn check_weights(&self) -> Result<(), TransformError> {
        let path = &self.settings.model_path;
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|_| TransformError::MissingWeights(path.clone()))?;

        let Some(expected) = self.settings.model_sha256.as_deref() else {
            return Ok(());
        };

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|source| TransformError::Input {
                    path: path.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        let actual = hex::encode(hasher.finalize());
        if actual != expected.to_lowercase() {
            return Err(TransformError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        info!("Model weights verified: {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Upscaler for ModelRunnerUpscaler {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn upscale(
        &self,
        input: &Path,
        output: &Path,
        scale: u32,
    ) -> Result<(), TransformError> {
        self.verify_weights().await?;

        info!(
            "Running {} x{} on {} ({} -> {})",
            self.settings.runner,
            scale,
            self.device,
            input.display(),
            output.display()
        );

        let result = Command::new(&self.settings.runner)
            .args(self.runner_args(input, output, scale))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransformError::Launch {
                program: self.settings.runner.clone(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr
                .trim()
                .chars()
                .rev()
                .take(2000)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(TransformError::RunnerFailed {
                status: result.status.to_string(),
                stderr: tail,
            });
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => {
                info!("Upscaling completed: {} ({} bytes)", output.display(), meta.len());
                Ok(())
            }
            _ => Err(TransformError::EmptyOutput(output.to_path_buf())),
        }
    }

    async fn health_check(&self) -> bool {
        self.verify_weights().await.is_ok()
    }
}

/// Factory function to create the configured upscaler
pub fn create_upscaler(config: &PipelineConfig) -> Result<Arc<dyn Upscaler>, TransformError> {
    match config.upscale_mode {
        UpscaleMode::Passthrough => Ok(Arc::new(PassthroughUpscaler)),
        UpscaleMode::Model => Ok(Arc::new(ModelRunnerUpscaler::new(config.model.clone())?)),
    }
}

/// Upscaler that always fails (for testing)
#[cfg(test)]
pub struct FailingUpscaler;

#[cfg(test)]
#[async_trait]
impl Upscaler for FailingUpscaler {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn upscale(&self, _input: &Path, output: &Path, _scale: u32) -> Result<(), TransformError> {
        Err(TransformError::EmptyOutput(output.to_path_buf()))
    }
}
