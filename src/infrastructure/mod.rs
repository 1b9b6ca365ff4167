pub mod notifier;
pub mod storage;
pub mod upscaler;

use crate::AppState;
use crate::config::PipelineConfig;
use crate::services::pipeline::UpscalePipeline;
use std::sync::Arc;

/// Wires storage, transform and notifier into shared application state
pub async fn build_state(config: PipelineConfig) -> anyhow::Result<AppState> {
    let storage = storage::setup_storage(
        &config.storage,
        &[config.raw_bucket.as_str(), config.upscaled_bucket.as_str()],
    )
    .await?;
    let upscaler = upscaler::setup_upscaler(&config).await?;
    let notifier = notifier::setup_notifier(&config)?;

    let pipeline = UpscalePipeline::new(
        config.clone(),
        storage.clone(),
        upscaler.clone(),
        notifier,
    )?;

    Ok(AppState {
        pipeline: Arc::new(pipeline),
        storage,
        upscaler,
        config,
    })
}
