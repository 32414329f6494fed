//! Batch stage ledger tests
//!
//! Stage statuses may only advance Pending -> InProgress -> Complete,
//! and at most one batch carries the active flag.

use callaudit_pipeline::db::{self, batches};
use callaudit_pipeline::types::{Stage, StageStatus};

#[tokio::test]
async fn stage_status_advances_forward_only() {
    // Given: a fresh batch
    let pool = db::init_memory_pool().await.unwrap();
    let batch_id = batches::create_batch(&pool, "12-08-2025").await.unwrap();

    // When: the LID stage advances through its lifecycle
    batches::set_stage_status(&pool, batch_id, Stage::Lid, StageStatus::InProgress)
        .await
        .unwrap();
    batches::set_stage_status(&pool, batch_id, Stage::Lid, StageStatus::Complete)
        .await
        .unwrap();

    // Then: moving backward is rejected and the status is unchanged
    let backward =
        batches::set_stage_status(&pool, batch_id, Stage::Lid, StageStatus::InProgress).await;
    assert!(backward.is_err());

    let batch = batches::load_batch(&pool, batch_id).await.unwrap().unwrap();
    assert_eq!(batch.lid, StageStatus::Complete);
}

#[tokio::test]
async fn rewriting_the_current_status_is_a_noop() {
    let pool = db::init_memory_pool().await.unwrap();
    let batch_id = batches::create_batch(&pool, "12-08-2025").await.unwrap();

    batches::set_stage_status(&pool, batch_id, Stage::Denoise, StageStatus::InProgress)
        .await
        .unwrap();
    // Re-running the same transition must stay idempotent
    batches::set_stage_status(&pool, batch_id, Stage::Denoise, StageStatus::InProgress)
        .await
        .unwrap();

    let batch = batches::load_batch(&pool, batch_id).await.unwrap().unwrap();
    assert_eq!(batch.denoise, StageStatus::InProgress);
}

#[tokio::test]
async fn every_stage_starts_pending() {
    let pool = db::init_memory_pool().await.unwrap();
    let batch_id = batches::create_batch(&pool, "12-08-2025").await.unwrap();
    let batch = batches::load_batch(&pool, batch_id).await.unwrap().unwrap();

    for stage in Stage::ALL {
        assert_eq!(batch.stage_status(stage), StageStatus::Pending);
    }
}

#[tokio::test]
async fn at_most_one_batch_is_active() {
    // Given: two batches, the first currently active
    let pool = db::init_memory_pool().await.unwrap();
    let first = batches::create_batch(&pool, "12-08-2025").await.unwrap();
    let second = batches::create_batch(&pool, "13-08-2025").await.unwrap();
    batches::activate_batch(&pool, first).await.unwrap();

    // When: the second batch is activated (rollover)
    batches::activate_batch(&pool, second).await.unwrap();

    // Then: only the second carries the flag
    let active = batches::load_active_batch(&pool).await.unwrap().unwrap();
    assert_eq!(active.id, second);
    let old = batches::load_batch(&pool, first).await.unwrap().unwrap();
    assert!(!old.current_batch);
}
