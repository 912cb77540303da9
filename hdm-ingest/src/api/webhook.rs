//! Change-feed push notifications
//!
//! POST /webhook/drive. The resource state header decides the work:
//! `sync` is the handshake sent right after a watch is registered and is
//! only acknowledged; `change` polls the feed and runs the pipeline over
//! every candidate id; any other state is acknowledged without work.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const CHANNEL_ID_HEADER: &str = "X-Goog-Channel-ID";
pub const RESOURCE_STATE_HEADER: &str = "X-Goog-Resource-State";
pub const CHANNEL_TOKEN_HEADER: &str = "X-Goog-Channel-Token";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    /// Files that reached Processed (change notifications only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /webhook/drive
pub async fn drive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<WebhookResponse>> {
    let channel_id = header(&headers, CHANNEL_ID_HEADER).unwrap_or_default();
    let resource_state = header(&headers, RESOURCE_STATE_HEADER).unwrap_or_default();
    info!(channel_id, resource_state, "Change notification received");

    if let Some(expected) = state.settings.watch.channel_token.as_deref() {
        if header(&headers, CHANNEL_TOKEN_HEADER) != Some(expected) {
            warn!(channel_id, "Channel token mismatch; notification rejected");
            return Err(ApiError::Unauthorized("channel token mismatch".into()));
        }
    }

    match resource_state {
        "sync" => {
            debug!(channel_id, "Sync handshake acknowledged");
            Ok(Json(WebhookResponse {
                status: "sync acknowledged",
                processed: None,
            }))
        }
        "change" => {
            let file_ids = match state.tracker.collect_changes().await {
                Ok(ids) => ids,
                Err(e) => {
                    state.record_error(format!("change poll: {}", e)).await;
                    return Err(ApiError::Internal(e.to_string()));
                }
            };

            let results = state
                .pipeline
                .process_files(&file_ids, &state.shutdown)
                .await;
            let processed = results.iter().filter(|(_, r)| r.is_processed()).count();
            if let Some((file_id, result)) = results.iter().rev().find(|(_, r)| !r.is_success()) {
                state.record_error(format!("{}: {}", file_id, result)).await;
            }

            info!(
                candidates = file_ids.len(),
                processed, "Change notification handled"
            );
            Ok(Json(WebhookResponse {
                status: "OK",
                processed: Some(processed),
            }))
        }
        other => {
            debug!(resource_state = other, "Notification state ignored");
            Ok(Json(WebhookResponse {
                status: "OK",
                processed: None,
            }))
        }
    }
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/drive", post(drive_webhook))
}
