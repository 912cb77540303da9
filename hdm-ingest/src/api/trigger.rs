//! Direct pipeline triggers
//!
//! POST / (Pub/Sub push), POST /test (manual), POST /trigger/inbox (batch)

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::models::ProcessResult;
use crate::services::BatchTally;
use crate::AppState;

/// Pub/Sub push envelope: `{"message": {"data": base64(json)}}`
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
}

#[derive(Debug, Deserialize)]
pub struct PushMessage {
    pub data: String,
    #[serde(default, rename = "messageId")]
    pub message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileRequest {
    #[serde(default)]
    pub file_id: String,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub status: &'static str,
    pub result: ProcessResult,
    pub file_id: String,
}

/// Decode a push envelope down to the file id it names
pub fn decode_push(body: &[u8]) -> Result<String, String> {
    let envelope: PushEnvelope =
        serde_json::from_slice(body).map_err(|e| format!("invalid push message: {}", e))?;
    let data = STANDARD
        .decode(envelope.message.data.trim())
        .map_err(|e| format!("invalid message data: {}", e))?;
    let request: FileRequest =
        serde_json::from_slice(&data).map_err(|e| format!("invalid file data: {}", e))?;
    if request.file_id.trim().is_empty() {
        return Err("file_id is required".into());
    }
    Ok(request.file_id)
}

async fn run_one(state: &AppState, file_id: &str) -> ProcessResult {
    let result = state.pipeline.process_file(file_id, &state.shutdown).await;
    if let ProcessResult::Error(message) = &result {
        state.record_error(format!("{}: {}", file_id, message)).await;
    }
    result
}

/// POST /
pub async fn pubsub_push(State(state): State<AppState>, body: Bytes) -> ApiResult<StatusCode> {
    let file_id = decode_push(&body).map_err(|e| {
        warn!(error = %e, "Rejected push message");
        ApiError::BadRequest(e)
    })?;
    info!(file_id = %file_id, "Push message received");

    match run_one(&state, &file_id).await {
        ProcessResult::Error(message) => Err(ApiError::Internal(message)),
        _ => Ok(StatusCode::OK),
    }
}

/// POST /test
pub async fn manual_trigger(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let request: FileRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("file_id is required".into()))?;
    if request.file_id.trim().is_empty() {
        return Err(ApiError::BadRequest("file_id is required".into()));
    }
    info!(file_id = %request.file_id, "Manual trigger");

    let result = run_one(&state, &request.file_id).await;
    let (status, label) = if result.is_success() {
        (StatusCode::OK, "success")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "failed")
    };
    Ok((
        status,
        Json(TriggerResponse {
            status: label,
            result,
            file_id: request.file_id,
        }),
    ))
}

/// POST /trigger/inbox
pub async fn trigger_inbox(State(state): State<AppState>) -> ApiResult<Json<BatchTally>> {
    let tally = match state.pipeline.process_inbox(&state.shutdown).await {
        Ok(tally) => tally,
        Err(e) => {
            state.record_error(format!("inbox listing: {}", e)).await;
            return Err(e.into());
        }
    };
    if let Some(entry) = tally.details.iter().rev().find(|d| !d.result.is_success()) {
        let detail = entry.detail.as_deref().unwrap_or_default();
        state.record_error(format!("{}: {}", entry.id, detail)).await;
    }
    Ok(Json(tally))
}

pub fn trigger_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(pubsub_push))
        .route("/test", post(manual_trigger))
        .route("/trigger/inbox", post(trigger_inbox))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(inner: &str) -> Vec<u8> {
        serde_json::json!({ "message": { "data": STANDARD.encode(inner) } })
            .to_string()
            .into_bytes()
    }

    #[test]
    fn test_decode_push() {
        assert_eq!(
            decode_push(&envelope(r#"{"file_id":"doc1"}"#)).unwrap(),
            "doc1"
        );
    }

    #[test]
    fn test_decode_push_rejects_malformed() {
        assert!(decode_push(b"not json").is_err());
        assert!(decode_push(br#"{"message":{"data":"%%%"}}"#).is_err());
        assert!(decode_push(&envelope("not json")).is_err());
        assert!(decode_push(&envelope(r#"{"file_id":""}"#)).is_err());
        assert!(decode_push(&envelope(r#"{}"#)).is_err());
    }
}
