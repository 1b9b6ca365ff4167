pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::PipelineConfig;
use crate::services::pipeline::UpscalePipeline;
use crate::services::storage::ObjectStore;
use crate::services::upscaler::Upscaler;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upscale::upscale_video,
        api::handlers::events::handle_storage_event,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            utils::validation::UpscaleRequest,
            utils::validation::StorageObjectRef,
            api::handlers::upscale::UpscaleResponse,
            api::handlers::health::HealthResponse,
            api::error::ErrorResponse,
            services::pipeline::ErrorKind,
        )
    ),
    tags(
        (name = "pipeline", description = "Video upscaling ingress"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UpscalePipeline>,
    pub storage: Arc<dyn ObjectStore>,
    pub upscaler: Arc<dyn Upscaler>,
    pub config: PipelineConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/upscale", post(api::handlers::upscale::upscale_video))
        .route("/events", post(api::handlers::events::handle_storage_event))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
