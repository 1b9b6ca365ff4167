use crate::config::PipelineConfig;
use crate::services::upscaler::{Upscaler, create_upscaler};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn setup_upscaler(config: &PipelineConfig) -> anyhow::Result<Arc<dyn Upscaler>> {
    let upscaler = create_upscaler(config)?;

    // Warm up: verifies model weights once before the first request
    if upscaler.health_check().await {
        info!("🎞️  Upscaler ready: {} (x{})", upscaler.name(), config.model.scale);
    } else {
        warn!(
            "⚠️  Upscaler '{}' not ready! Check weights at {}",
            upscaler.name(),
            config.model.model_path.display()
        );
    }

    Ok(upscaler)
}
