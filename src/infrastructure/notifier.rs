use crate::config::PipelineConfig;
use crate::services::notifier::{NextStageNotifier, create_notifier};
use std::sync::Arc;
use tracing::info;

pub fn setup_notifier(config: &PipelineConfig) -> anyhow::Result<Arc<dyn NextStageNotifier>> {
    match &config.next_stage_url {
        Some(url) => info!("📨 Next stage: {}", url),
        None => info!("📨 Next stage: not configured, hand-off is logged only"),
    }
    Ok(create_notifier(config)?)
}
