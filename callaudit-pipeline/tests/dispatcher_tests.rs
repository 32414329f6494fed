//! Stage dispatcher idempotency tests
//!
//! A present marker row short-circuits the remote call entirely, and a
//! failed call is markered so it is not retried forever. The inference
//! client here points at a closed local port, so any attempted outbound
//! call fails fast, which makes "no call was made" observable.

use callaudit_pipeline::db::{self, markers};
use callaudit_pipeline::services::{
    EventLog, InferenceClient, MediatorClient, StageDispatcher, StageKind, StageSpec,
};
use callaudit_pipeline::types::Stage;
use std::sync::Arc;
use std::time::Duration;

const BATCH_ID: i64 = 1;
// Discard port: nothing listens here, connections fail immediately
const DEAD_HOST: &str = "127.0.0.1";
const DEAD_PORT: u16 = 9;

fn lid_spec() -> StageSpec {
    StageSpec {
        stage: Stage::Lid,
        kind: StageKind::Lid,
        marker_stage: "lid",
        done_column: "lid_done",
        container: "test-lid".to_string(),
        endpoint: "/file_stt_features".to_string(),
        warmup: Duration::from_secs(0),
        entity: "LID",
    }
}

async fn dispatcher(pool: sqlx::SqlitePool) -> StageDispatcher {
    let mediator = Arc::new(
        MediatorClient::new(vec![DEAD_HOST.to_string()], DEAD_PORT, Duration::from_secs(2))
            .unwrap(),
    );
    let inference = InferenceClient::new(DEAD_PORT, Duration::from_secs(2)).unwrap();
    let event_log = EventLog::new(pool.clone());
    StageDispatcher::new(pool, mediator, inference, event_log, 4)
}

#[tokio::test]
async fn marker_hit_short_circuits_the_remote_call() {
    // Given: a file already carrying a LID marker
    let pool = db::init_memory_pool().await.unwrap();
    markers::insert_distribution(&pool, "seen.wav", DEAD_HOST, BATCH_ID)
        .await
        .unwrap();
    markers::insert_marker(
        &pool,
        "lid",
        "seen.wav",
        BATCH_ID,
        Some(DEAD_HOST),
        Some("hi"),
        Some(42.0),
        None,
    )
    .await
    .unwrap();

    let dispatcher = dispatcher(pool.clone()).await;
    let files = markers::load_distributions(&pool, BATCH_ID).await.unwrap();

    // When: the file is dispatched again
    let summary = dispatcher
        .dispatch_files(BATCH_ID, &lid_spec(), &files)
        .await
        .unwrap();

    // Then: the stored result is reused; with a dead endpoint any real
    // call would have failed, so the file landing in `reused` proves no
    // outbound call was made
    assert_eq!(summary.reused, vec!["seen.wav".to_string()]);
    assert!(summary.failed.is_empty());

    // And the stored marker is unchanged
    let marker = markers::load_marker(&pool, "lid", "seen.wav", BATCH_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(marker.language.as_deref(), Some("hi"));
    assert_eq!(marker.audio_duration, Some(42.0));
}

#[tokio::test]
async fn failed_files_are_markered_and_not_retried() {
    // Given: a file with no marker and an unreachable endpoint
    let pool = db::init_memory_pool().await.unwrap();
    markers::insert_distribution(&pool, "fresh.wav", DEAD_HOST, BATCH_ID)
        .await
        .unwrap();

    let dispatcher = dispatcher(pool.clone()).await;
    let files = markers::load_distributions(&pool, BATCH_ID).await.unwrap();

    // When: the first dispatch fails
    let summary = dispatcher
        .dispatch_files(BATCH_ID, &lid_spec(), &files)
        .await
        .unwrap();
    assert_eq!(summary.failed, vec!["fresh.wav".to_string()]);

    // Then: the failure is markered...
    let marker = markers::load_marker(&pool, "lid", "fresh.wav", BATCH_ID)
        .await
        .unwrap()
        .unwrap();
    assert!(marker.error.is_some());

    // ...and a re-dispatch reuses the marker instead of calling again
    let second = dispatcher
        .dispatch_files(BATCH_ID, &lid_spec(), &files)
        .await
        .unwrap();
    assert_eq!(second.reused, vec!["fresh.wav".to_string()]);
    assert!(second.failed.is_empty());
}

#[tokio::test]
async fn one_failing_file_does_not_abort_the_others() {
    // Given: one markered file and one that will fail
    let pool = db::init_memory_pool().await.unwrap();
    for file in ["good.wav", "bad.wav"] {
        markers::insert_distribution(&pool, file, DEAD_HOST, BATCH_ID)
            .await
            .unwrap();
    }
    markers::insert_marker(&pool, "lid", "good.wav", BATCH_ID, Some(DEAD_HOST), Some("en"), Some(10.0), None)
        .await
        .unwrap();

    let dispatcher = dispatcher(pool.clone()).await;
    let files = markers::load_distributions(&pool, BATCH_ID).await.unwrap();

    let summary = dispatcher
        .dispatch_files(BATCH_ID, &lid_spec(), &files)
        .await
        .unwrap();

    assert_eq!(summary.reused, vec!["good.wav".to_string()]);
    assert_eq!(summary.failed, vec!["bad.wav".to_string()]);
}
