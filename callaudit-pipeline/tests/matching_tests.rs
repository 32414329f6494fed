//! Trade-to-call matching scenarios
//!
//! Pure-engine scenarios against an in-memory snapshot, plus the first
//! pass against an in-memory database.

use callaudit_pipeline::db::call_metadata::CallMetadataRecord;
use callaudit_pipeline::db::calls::CallRecord;
use callaudit_pipeline::db::conversations::{ConversationRecord, LotQuantityMapping};
use callaudit_pipeline::db::trades::TradeRecord;
use callaudit_pipeline::db::{self, call_metadata, trades};
use callaudit_pipeline::matching::engine::{
    evaluate_flags, price_within_band, run_first_pass, tiered_search, TradeView,
};
use callaudit_pipeline::matching::{classify, BatchSnapshot, Finding, TradeSide};
use callaudit_pipeline::types::CallStatus;

const BATCH_ID: i64 = 1;

fn call_meta(
    id: i64,
    file: &str,
    mobile: Option<&str>,
    client_id: Option<&str>,
    start_time: &str,
    end_time: &str,
) -> CallMetadataRecord {
    CallMetadataRecord {
        id,
        recording_file_name: file.to_string(),
        client_mobile_number: mobile.map(String::from),
        client_id: client_id.map(String::from),
        call_start_date: Some("12-08-2025".to_string()),
        call_start_time: Some(start_time.to_string()),
        call_end_date: Some("12-08-2025".to_string()),
        call_end_time: Some(end_time.to_string()),
        batch_id: BATCH_ID,
    }
}

fn call(id: i64, file: &str, status: CallStatus) -> CallRecord {
    CallRecord {
        id,
        audio_name: file.to_string(),
        status,
        language: Some("hi".to_string()),
        language_id: None,
        audio_duration: 120.0,
        ip: None,
        process_id: 1,
        category_mapping_id: 1,
        batch_id: BATCH_ID,
        meta_data: None,
    }
}

fn trade(id: i64, al_number: Option<&str>, symbol: &str, scrip_name: &str) -> TradeRecord {
    TradeRecord {
        id,
        order_id: format!("{}", 1000 + id),
        client_code: "ZC104".to_string(),
        al_number: al_number.map(String::from),
        reg_number: None,
        trade_date: "20250812".to_string(),
        order_placed_time: "101500".to_string(),
        symbol: Some(symbol.to_string()),
        scrip_name: Some(scrip_name.to_string()),
        strike_price: None,
        trade_quantity: 50,
        trade_price: 1000.0,
        batch_id: BATCH_ID,
        voice_recording_confirmations: Some("Non observatory call".to_string()),
        audio_file_name: None,
        audio_call_ref: None,
    }
}

fn mention(call_id: i64, script_name: &str, lot_quantity: f64, price: f64) -> ConversationRecord {
    ConversationRecord {
        id: 0,
        call_id,
        script_name: script_name.to_string(),
        lot_quantity: Some(lot_quantity),
        trade_price: Some(price),
        strike_price: None,
        current_market_price: Some("NO".to_string()),
        batch_id: BATCH_ID,
    }
}

fn snapshot(
    call_metadata: Vec<CallMetadataRecord>,
    calls: Vec<CallRecord>,
    trades: Vec<TradeRecord>,
    conversations: Vec<ConversationRecord>,
    lot_mappings: Vec<LotQuantityMapping>,
) -> BatchSnapshot {
    BatchSnapshot::from_parts(
        BATCH_ID,
        call_metadata,
        calls,
        trades,
        Vec::new(),
        conversations,
        lot_mappings,
    )
}

#[test]
fn window_containing_order_is_pre_trade() {
    // Given: a call on the trade's AL number whose window contains the
    // order timestamp (10:15:00)
    let meta = call_meta(1, "rec-1.wav", Some("9876543210"), None, "10:10:00", "10:20:00");
    let snap = snapshot(vec![meta], vec![], vec![], vec![], vec![]);
    let trade = trade(1, Some("9876543210.0"), "TCS", "TATA CONSULTANCY SERVICES LTD");

    // When: the tiered search runs
    let result = tiered_search(&snap, &TradeView::from_trade(&trade), false);

    // Then: tier a matches as pre-trade with exactly that call
    assert_eq!(result.finding, Finding::PreTradeFound);
    assert_eq!(result.calls.len(), 1);
    assert_eq!(result.calls[0].recording_file_name, "rec-1.wav");
}

#[test]
fn nearest_call_before_order_wins_over_later_ones() {
    // Two calls end before the order time; the later-ending one ranks first
    let early = call_meta(1, "early.wav", Some("9876543210"), None, "09:00:00", "09:10:00");
    let late = call_meta(2, "late.wav", Some("9876543210"), None, "09:30:00", "09:45:00");
    let snap = snapshot(vec![early, late], vec![], vec![], vec![], vec![]);
    let trade = trade(1, Some("9876543210"), "TCS", "TCS");

    let result = tiered_search(&snap, &TradeView::from_trade(&trade), false);

    assert_eq!(result.finding, Finding::PreTradeFound);
    assert_eq!(result.calls[0].recording_file_name, "late.wav");
}

#[test]
fn call_after_order_is_post_trade() {
    let meta = call_meta(1, "after.wav", Some("9876543210"), None, "11:00:00", "11:05:00");
    let snap = snapshot(vec![meta], vec![], vec![], vec![], vec![]);
    let trade = trade(1, Some("9876543210"), "TCS", "TCS");

    let result = tiered_search(&snap, &TradeView::from_trade(&trade), false);

    assert_eq!(result.finding, Finding::PostTradeFound);
}

#[test]
fn client_code_join_is_the_fallback_tier() {
    // No mobile-number match exists, but the telephony client id matches
    // the trade's client code
    let meta = call_meta(1, "by-code.wav", Some("1112223334"), Some("zc104"), "10:10:00", "10:20:00");
    let snap = snapshot(vec![meta], vec![], vec![], vec![], vec![]);
    let trade = trade(1, Some("9876543210"), "TCS", "TCS");

    let result = tiered_search(&snap, &TradeView::from_trade(&trade), false);

    assert_eq!(result.finding, Finding::PreTradeFound);
    assert_eq!(result.calls[0].recording_file_name, "by-code.wav");
}

#[test]
fn no_candidate_at_any_tier_is_no_call_record() {
    let meta = call_meta(1, "other.wav", Some("5550001111"), Some("xx999"), "10:00:00", "10:05:00");
    let snap = snapshot(vec![meta], vec![], vec![], vec![], vec![]);
    let trade = trade(1, Some("9876543210"), "TCS", "TCS");

    let result = tiered_search(&snap, &TradeView::from_trade(&trade), false);

    assert_eq!(result.finding, Finding::NoCallRecordFound);
    assert!(result.calls.is_empty());
}

#[test]
fn full_agreement_classifies_as_details_matching() {
    // Given: a conversation mentioning the same instrument, price within
    // the band and sufficient quantity
    let the_call = call(7, "rec-1.wav", CallStatus::AuditDone);
    let the_trade = trade(1, Some("9876543210"), "TCS", "TATA CONSULTANCY SERVICES LTD");
    let mentions = vec![mention(7, "Tata Consultancy Services", 100.0, 1001.5)];
    let snap = snapshot(vec![], vec![the_call], vec![the_trade.clone()], mentions, vec![]);

    // When: the flags are evaluated
    let view = TradeView::from_trade(&the_trade);
    let mention_refs = snap.conversations_for_call(7);
    let flags = evaluate_flags(&snap, &view, &mention_refs);

    // Then: all three dimensions agree and the tag pair is the strongest
    assert!(flags.script && flags.price && flags.quantity);
    let (score, classification) = classify(flags, TradeSide::Pre);
    assert_eq!(score, 3);
    assert_eq!(classification.tag1.as_str(), "Pre trade found");
    assert_eq!(classification.tag2, "Details matching");
}

#[test]
fn quantity_match_is_monotone_in_trade_quantity() {
    // Fixed aggregated lot quantity of 100
    let the_call = call(7, "rec-1.wav", CallStatus::AuditDone);
    let mentions = vec![mention(7, "Tata Consultancy Services", 100.0, 1000.0)];

    for (quantity, expected) in [(1, true), (60, true), (100, true), (101, false), (250, false)] {
        let mut the_trade = trade(1, Some("9876543210"), "TCS", "TATA CONSULTANCY SERVICES LTD");
        the_trade.trade_quantity = quantity;
        let snap = snapshot(
            vec![],
            vec![the_call.clone()],
            vec![the_trade.clone()],
            mentions.clone(),
            vec![],
        );
        let view = TradeView::from_trade(&the_trade);
        let mention_refs = snap.conversations_for_call(7);
        let flags = evaluate_flags(&snap, &view, &mention_refs);
        assert_eq!(
            flags.quantity, expected,
            "quantity {} expected {}",
            quantity, expected
        );
    }
}

#[test]
fn lot_multiplier_rescues_quantity_in_lots() {
    // The conversation speaks in lots (2), the trade in shares (100);
    // the reference table maps the symbol to a 50-share lot
    let the_call = call(7, "rec-1.wav", CallStatus::AuditDone);
    let mut the_trade = trade(1, Some("9876543210"), "TCS", "TATA CONSULTANCY SERVICES LTD");
    the_trade.trade_quantity = 100;
    let mentions = vec![mention(7, "Tata Consultancy Services", 2.0, 1000.0)];
    let lot = LotQuantityMapping {
        id: 1,
        symbol: "TCS".to_string(),
        script_name: Some("Tata Consultancy Services".to_string()),
        variation1: None,
        variation2: None,
        variation3: None,
        quantity: Some(50),
    };
    let snap = snapshot(
        vec![],
        vec![the_call],
        vec![the_trade.clone()],
        mentions,
        vec![lot],
    );

    let view = TradeView::from_trade(&the_trade);
    let mention_refs = snap.conversations_for_call(7);
    let flags = evaluate_flags(&snap, &view, &mention_refs);

    assert!(flags.quantity);
}

#[test]
fn price_band_scenarios_at_trade_price_1000() {
    // 650-1249 tier carries (0.90, 2)
    assert!(price_within_band(1000.0, 1001.5));
    assert!(price_within_band(1000.0, 1002.0));
    assert!(!price_within_band(1000.0, 1004.0));
}

#[tokio::test]
async fn first_pass_tags_unmatched_trade_with_no_call_record() {
    // Given: a batch whose only call metadata belongs to another client
    let pool = db::init_memory_pool().await.unwrap();
    call_metadata::insert_call_metadata(
        &pool,
        &call_meta(0, "other.wav", Some("5550001111"), Some("xx999"), "10:00:00", "10:05:00"),
    )
    .await
    .unwrap();
    let the_trade = trade(0, Some("9876543210"), "TCS", "TATA CONSULTANCY SERVICES LTD");
    let trade_id = trades::insert_trade(&pool, &the_trade).await.unwrap();

    // When: the first matching pass runs
    let supported = vec!["en".to_string(), "hi".to_string(), "hinglish".to_string()];
    let mappings = run_first_pass(&pool, BATCH_ID, &supported).await.unwrap();

    // Then: no mapping is created and the trade row carries the literal tag
    assert_eq!(mappings, 0);
    let stored = trades::load_trade(&pool, trade_id).await.unwrap().unwrap();
    assert_eq!(
        stored.voice_recording_confirmations.as_deref(),
        Some("No call record found")
    );
}

#[tokio::test]
async fn first_pass_creates_mapping_rows_for_matched_trades() {
    let pool = db::init_memory_pool().await.unwrap();
    call_metadata::insert_call_metadata(
        &pool,
        &call_meta(0, "rec-1.wav", Some("9876543210"), None, "10:10:00", "10:20:00"),
    )
    .await
    .unwrap();
    let the_trade = trade(0, Some("9876543210"), "TCS", "TATA CONSULTANCY SERVICES LTD");
    trades::insert_trade(&pool, &the_trade).await.unwrap();

    let supported = vec!["en".to_string(), "hi".to_string()];
    let mappings = run_first_pass(&pool, BATCH_ID, &supported).await.unwrap();

    assert_eq!(mappings, 1);
    let rows = trades::load_mappings_for_batch(&pool, BATCH_ID).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].audio_file_name, "rec-1.wav");
    assert_eq!(rows[0].voice_recording_confirmations, "Pre trade found");
    assert!(!rows[0].is_script && !rows[0].is_price && !rows[0].is_quantity);
}
