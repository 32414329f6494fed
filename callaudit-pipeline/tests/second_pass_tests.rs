//! Second matching pass end-to-end against an in-memory database
//!
//! First-pass mappings tagged "Pre trade found" are re-scored once
//! conversation rows exist, flags land on the mapping row, and the best
//! mapping becomes the trade's final verdict with an audit answer.

use callaudit_pipeline::db;
use callaudit_pipeline::db::calls::{self, NewCall};
use callaudit_pipeline::db::conversations::{self, ConversationRecord};
use callaudit_pipeline::db::trades::{self, NewTradeAudioMapping, TradeRecord};
use callaudit_pipeline::matching::second_pass::run_second_pass;
use callaudit_pipeline::types::CallStatus;
use sqlx::Row;

const BATCH_ID: i64 = 1;

fn trade_record(id: i64) -> TradeRecord {
    TradeRecord {
        id,
        order_id: "5001".to_string(),
        client_code: "ZC104".to_string(),
        al_number: Some("9876543210".to_string()),
        reg_number: None,
        trade_date: "20250812".to_string(),
        order_placed_time: "101500".to_string(),
        symbol: Some("TCS".to_string()),
        scrip_name: Some("TATA CONSULTANCY SERVICES LTD".to_string()),
        strike_price: None,
        trade_quantity: 50,
        trade_price: 1000.0,
        batch_id: BATCH_ID,
        voice_recording_confirmations: Some("Non observatory call".to_string()),
        audio_file_name: None,
        audio_call_ref: None,
    }
}

#[tokio::test]
async fn second_pass_promotes_a_confirmed_trade() {
    let pool = db::init_memory_pool().await.unwrap();

    // Given: an audited call with extracted conversation rows
    let call_id = calls::insert_call(
        &pool,
        &NewCall {
            audio_name: "rec-1.wav".to_string(),
            language: Some("hi".to_string()),
            language_id: None,
            audio_duration: 120.0,
            ip: None,
            process_id: 1,
            category_mapping_id: 1,
            batch_id: BATCH_ID,
            meta_data: None,
        },
    )
    .await
    .unwrap()
    .unwrap();
    calls::set_call_status(&pool, call_id, CallStatus::AuditDone)
        .await
        .unwrap();

    conversations::insert_conversation(
        &pool,
        &ConversationRecord {
            id: 0,
            call_id,
            script_name: "Tata Consultancy Services".to_string(),
            lot_quantity: Some(100.0),
            trade_price: Some(1001.5),
            strike_price: None,
            current_market_price: Some("NO".to_string()),
            batch_id: BATCH_ID,
        },
    )
    .await
    .unwrap();

    // ...and a first-pass mapping for a still-unconfirmed trade
    let trade_id = trades::insert_trade(&pool, &trade_record(0)).await.unwrap();
    let stored_trade = trades::load_trade(&pool, trade_id).await.unwrap().unwrap();
    trades::insert_mappings(
        &pool,
        &[NewTradeAudioMapping::from_trade(
            &stored_trade,
            "Pre trade found",
            "rec-1.wav",
        )],
    )
    .await
    .unwrap();

    // When: the second pass runs
    run_second_pass(&pool, BATCH_ID, 10_000).await.unwrap();

    // Then: all three flags land on the mapping row
    let mappings = trades::load_mappings_for_batch(&pool, BATCH_ID).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert!(mappings[0].is_script);
    assert!(mappings[0].is_price);
    assert!(mappings[0].is_quantity);

    // ...the trade carries the final verdict and audio reference
    let final_trade = trades::load_trade(&pool, trade_id).await.unwrap().unwrap();
    assert_eq!(
        final_trade.voice_recording_confirmations.as_deref(),
        Some("Pre trade found")
    );
    assert_eq!(final_trade.audio_file_name.as_deref(), Some("rec-1.wav"));
    assert_eq!(final_trade.audio_call_ref, Some(call_id));

    // ...and the verdict was written as audit question 1
    let answer = sqlx::query(
        "SELECT answer FROM audit_answers WHERE call_id = ? AND section_id = 1 AND question_id = 1",
    )
    .bind(call_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(answer.get::<String, _>("answer"), "Pre trade found");
}

#[tokio::test]
async fn second_pass_leaves_unsupported_language_mappings_unflagged() {
    let pool = db::init_memory_pool().await.unwrap();

    let call_id = calls::insert_call(
        &pool,
        &NewCall {
            audio_name: "foreign.wav".to_string(),
            language: Some("ta".to_string()),
            language_id: None,
            audio_duration: 90.0,
            ip: None,
            process_id: 1,
            category_mapping_id: 1,
            batch_id: BATCH_ID,
            meta_data: None,
        },
    )
    .await
    .unwrap()
    .unwrap();
    calls::set_call_status(&pool, call_id, CallStatus::UnsupportedLanguage)
        .await
        .unwrap();

    let trade_id = trades::insert_trade(&pool, &trade_record(0)).await.unwrap();
    let stored_trade = trades::load_trade(&pool, trade_id).await.unwrap().unwrap();
    trades::insert_mappings(
        &pool,
        &[NewTradeAudioMapping::from_trade(
            &stored_trade,
            "Pre trade found",
            "foreign.wav",
        )],
    )
    .await
    .unwrap();

    run_second_pass(&pool, BATCH_ID, 10_000).await.unwrap();

    let mappings = trades::load_mappings_for_batch(&pool, BATCH_ID).await.unwrap();
    assert!(!mappings[0].is_script && !mappings[0].is_price && !mappings[0].is_quantity);

    // The trade's final verdict names the unsupported language, with the
    // recording kept as the audio reference
    let final_trade = trades::load_trade(&pool, trade_id).await.unwrap().unwrap();
    assert_eq!(
        final_trade.voice_recording_confirmations.as_deref(),
        Some("Unsupported Language")
    );
    assert_eq!(final_trade.audio_file_name.as_deref(), Some("foreign.wav"));
}
