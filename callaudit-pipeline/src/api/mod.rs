//! Exposed HTTP boundary
//!
//! Kept deliberately small: a health probe, the call-status webhook
//! receiver the monitoring side posts into, and the pull endpoint that
//! lets additional machines take a bounded slice of trade-matching work.

use crate::error::{ApiError, ApiResult};
use crate::matching::second_pass;
use crate::AppState;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhook/callStatus", post(call_status_webhook))
        .route("/api/matching/slice", post(matching_slice))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "callaudit-pipeline",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct CallStatusNotification {
    #[serde(rename = "callId")]
    call_id: i64,
    status: String,
    #[serde(rename = "audioDuration")]
    #[allow(dead_code)]
    audio_duration: Option<f64>,
}

/// Webhook receiver for call-status change notifications
async fn call_status_webhook(
    State(state): State<AppState>,
    Json(notification): Json<CallStatusNotification>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::info!(
        call_id = notification.call_id,
        status = %notification.status,
        "Call status notification received"
    );
    state
        .event_log
        .call_status(notification.call_id, &notification.status)
        .await;
    Ok(Json(json!({"received": true})))
}

#[derive(Debug, Deserialize)]
struct MatchingSliceRequest {
    batch_id: i64,
    start_index: usize,
    end_index: usize,
}

#[derive(Debug, Serialize)]
struct MatchingSliceResponse {
    evaluated: usize,
}

/// Evaluate a bounded index range of mapping rows
///
/// Used for horizontal fan-out: each machine posts a disjoint range.
async fn matching_slice(
    State(state): State<AppState>,
    Json(request): Json<MatchingSliceRequest>,
) -> ApiResult<Json<MatchingSliceResponse>> {
    if request.start_index >= request.end_index {
        return Err(ApiError::BadRequest(
            "start_index must be below end_index".to_string(),
        ));
    }
    if !state.flags.try_begin_matching() {
        return Err(ApiError::BadRequest(
            "a matching run is already in progress".to_string(),
        ));
    }

    let result = second_pass::run_second_pass_slice(
        &state.db,
        request.batch_id,
        request.start_index,
        request.end_index,
    )
    .await;
    state.flags.end_matching();

    let evaluated = result?;
    Ok(Json(MatchingSliceResponse { evaluated }))
}
