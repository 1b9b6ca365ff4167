use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub transform: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_ok = state
        .storage
        .health_check(&state.config.upscaled_bucket)
        .await;
    let transform_ok = state.upscaler.health_check().await;

    Json(HealthResponse {
        status: if storage_ok && transform_ok { "ok" } else { "degraded" }.to_string(),
        storage: if storage_ok { "connected" } else { "disconnected" }.to_string(),
        transform: if transform_ok {
            state.upscaler.name().to_string()
        } else {
            format!("{} (unavailable)", state.upscaler.name())
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
