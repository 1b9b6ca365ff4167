use crate::AppState;
use crate::api::error::AppError;
use crate::services::pipeline::UpscaleOutcome;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header::CONTENT_TYPE},
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct UpscaleResponse {
    /// Always "success"
    pub status: String,
    pub message: String,
    /// Locator of the downloaded original
    pub original_file: String,
    /// Locator of the upscaled result
    pub upscaled_file: String,
    pub filename: String,
}

impl From<UpscaleOutcome> for UpscaleResponse {
    fn from(outcome: UpscaleOutcome) -> Self {
        Self {
            status: "success".to_string(),
            message: "Video upscaling completed successfully".to_string(),
            original_file: outcome.original.uri(),
            upscaled_file: outcome.upscaled.uri(),
            filename: outcome.filename,
        }
    }
}

#[utoipa::path(
    post,
    path = "/upscale",
    request_body = UpscaleRequest,
    responses(
        (status = 200, description = "Video downloaded, upscaled and stored", body = UpscaleResponse),
        (status = 400, description = "Invalid request, oversized or unreachable source", body = ErrorResponse),
        (status = 500, description = "Storage, transform or internal failure", body = ErrorResponse)
    ),
    tag = "pipeline"
)]
pub async fn upscale_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UpscaleResponse>, AppError> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let outcome = state.pipeline.process_request(content_type, &body).await?;
    Ok(Json(outcome.into()))
}
