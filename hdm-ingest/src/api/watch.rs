//! Watch administration
//!
//! POST /admin/watch/{start,renew,stop}, GET /admin/watch/status

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::ApiResult;
use crate::models::WatchStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WatchResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub watch: WatchStatus,
}

pub async fn start_watch(State(state): State<AppState>) -> ApiResult<Json<WatchResponse>> {
    let watch = state.tracker.start_watch().await?;
    Ok(Json(WatchResponse {
        status: "OK",
        message: Some("Watch started"),
        watch,
    }))
}

pub async fn renew_watch(State(state): State<AppState>) -> ApiResult<Json<WatchResponse>> {
    let watch = state.tracker.renew_watch().await?;
    Ok(Json(WatchResponse {
        status: "OK",
        message: Some("Watch renewed"),
        watch,
    }))
}

pub async fn stop_watch(State(state): State<AppState>) -> ApiResult<Json<WatchResponse>> {
    let watch = state.tracker.stop_watch().await?;
    Ok(Json(WatchResponse {
        status: "OK",
        message: Some("Watch stopped"),
        watch,
    }))
}

pub async fn watch_status(State(state): State<AppState>) -> Json<WatchResponse> {
    Json(WatchResponse {
        status: "OK",
        message: None,
        watch: state.tracker.status().await,
    })
}

pub fn watch_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/watch/start", post(start_watch))
        .route("/admin/watch/renew", post(renew_watch))
        .route("/admin/watch/stop", post(stop_watch))
        .route("/admin/watch/status", get(watch_status))
}
