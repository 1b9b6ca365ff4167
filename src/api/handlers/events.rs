use crate::AppState;
use crate::api::error::event_error_message;
use crate::services::pipeline::{EventOutcome, PipelineError};
use crate::utils::validation::ValidationError;
use axum::{body::Bytes, extract::State};
use serde_json::Value;

pub const FINISHED_MESSAGE: &str = "Function finished successfully.";

/// The event ingress reports every outcome as a status line
pub fn render_event_result(result: &Result<EventOutcome, PipelineError>) -> String {
    match result {
        Ok(EventOutcome::Finished { .. }) => FINISHED_MESSAGE.to_string(),
        Ok(EventOutcome::Skipped(reason)) => format!("Skipped: {}", reason),
        Err(e) => event_error_message(e),
    }
}

#[utoipa::path(
    post,
    path = "/events",
    request_body = StorageObjectRef,
    responses(
        (status = 200, description = "Outcome line: finished, skipped or error", body = String, content_type = "text/plain")
    ),
    tag = "pipeline"
)]
pub async fn handle_storage_event(State(state): State<AppState>, body: Bytes) -> String {
    let result = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => state.pipeline.run_event(&payload).await,
        Err(_) => Err(PipelineError::Validation(ValidationError::new(
            "MALFORMED_EVENT",
            "Event payload must be JSON",
        ))),
    };
    render_event_result(&result)
}
