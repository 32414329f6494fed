//! HTTP boundary tests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use callaudit_pipeline::config::Settings;
use callaudit_pipeline::pipeline::PipelineFlags;
use callaudit_pipeline::{build_router, AppState};
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> axum::Router {
    let pool = callaudit_pipeline::db::init_memory_pool().await.unwrap();
    let state = AppState::new(pool, Settings::from_env(), Arc::new(PipelineFlags::new()));
    build_router(state)
}

#[tokio::test]
async fn health_returns_ok() {
    let response = app()
        .await
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn webhook_receiver_accepts_call_status_payloads() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhook/callStatus")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"callId": 7, "status": "TranscriptDone"}"#))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn matching_slice_rejects_an_inverted_range() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/matching/slice")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"batch_id": 1, "start_index": 5, "end_index": 2}"#,
        ))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn matching_slice_on_an_empty_batch_evaluates_nothing() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/matching/slice")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"batch_id": 1, "start_index": 0, "end_index": 100}"#,
        ))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["evaluated"], 0);
}
