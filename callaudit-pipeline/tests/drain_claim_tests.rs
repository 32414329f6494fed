//! Call claiming tests
//!
//! The drain loop claims calls through a single-statement status flip;
//! cooperating instances must never receive the same row.

use callaudit_pipeline::db;
use callaudit_pipeline::db::calls::{self, NewCall};
use callaudit_pipeline::types::CallStatus;

const BATCH_ID: i64 = 1;

fn new_call(audio_name: &str) -> NewCall {
    NewCall {
        audio_name: audio_name.to_string(),
        language: Some("hi".to_string()),
        language_id: None,
        audio_duration: 60.0,
        ip: None,
        process_id: 1,
        category_mapping_id: 1,
        batch_id: BATCH_ID,
        meta_data: None,
    }
}

#[tokio::test]
async fn consecutive_claims_never_return_the_same_call() {
    // Given: two Pending calls
    let pool = db::init_memory_pool().await.unwrap();
    calls::insert_call(&pool, &new_call("a.wav")).await.unwrap();
    calls::insert_call(&pool, &new_call("b.wav")).await.unwrap();

    // When: three claims run
    let first = calls::claim_next_call(&pool, BATCH_ID, CallStatus::Pending, CallStatus::Transcription)
        .await
        .unwrap()
        .unwrap();
    let second = calls::claim_next_call(&pool, BATCH_ID, CallStatus::Pending, CallStatus::Transcription)
        .await
        .unwrap()
        .unwrap();
    let third = calls::claim_next_call(&pool, BATCH_ID, CallStatus::Pending, CallStatus::Transcription)
        .await
        .unwrap();

    // Then: distinct rows, both flipped, nothing left to claim
    assert_ne!(first.id, second.id);
    assert_eq!(first.status, CallStatus::Transcription);
    assert_eq!(second.status, CallStatus::Transcription);
    assert!(third.is_none());
}

#[tokio::test]
async fn terminal_calls_are_never_claimed() {
    let pool = db::init_memory_pool().await.unwrap();
    let id = calls::insert_call(&pool, &new_call("short.wav"))
        .await
        .unwrap()
        .unwrap();
    calls::set_call_status(&pool, id, CallStatus::ShortCall).await.unwrap();

    let claimed =
        calls::claim_next_call(&pool, BATCH_ID, CallStatus::Pending, CallStatus::Transcription)
            .await
            .unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
async fn reverted_call_becomes_claimable_again() {
    // An STT failure hands the call back as Pending for a later cycle
    let pool = db::init_memory_pool().await.unwrap();
    calls::insert_call(&pool, &new_call("retry.wav")).await.unwrap();

    let claimed =
        calls::claim_next_call(&pool, BATCH_ID, CallStatus::Pending, CallStatus::Transcription)
            .await
            .unwrap()
            .unwrap();
    calls::set_call_status(&pool, claimed.id, CallStatus::Pending).await.unwrap();

    let reclaimed =
        calls::claim_next_call(&pool, BATCH_ID, CallStatus::Pending, CallStatus::Transcription)
            .await
            .unwrap()
            .unwrap();
    assert_eq!(reclaimed.id, claimed.id);
}

#[tokio::test]
async fn unfinished_count_tracks_terminal_exits() {
    let pool = db::init_memory_pool().await.unwrap();
    let a = calls::insert_call(&pool, &new_call("a.wav")).await.unwrap().unwrap();
    let b = calls::insert_call(&pool, &new_call("b.wav")).await.unwrap().unwrap();
    calls::insert_call(&pool, &new_call("c.wav")).await.unwrap();

    calls::set_call_status(&pool, a, CallStatus::Complete).await.unwrap();
    calls::set_call_status(&pool, b, CallStatus::UnsupportedLanguage)
        .await
        .unwrap();

    let unfinished = calls::count_unfinished_calls(&pool, BATCH_ID).await.unwrap();
    assert_eq!(unfinished, 1);
}

#[tokio::test]
async fn duplicate_audio_names_are_not_inserted_twice() {
    let pool = db::init_memory_pool().await.unwrap();
    let first = calls::insert_call(&pool, &new_call("dup.wav")).await.unwrap();
    let second = calls::insert_call(&pool, &new_call("dup.wav")).await.unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
}
