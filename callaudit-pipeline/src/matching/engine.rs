//! Matching passes: tiered candidate search and flag evaluation
//!
//! Tier order is business intent and is preserved exactly: calls whose
//! window contains the order timestamp beat nearest-ending-before
//! ("pre-trade"), which beat nearest-ending-after ("post-trade"); the
//! mobile-number join is tried before the client-code join, and the
//! first non-empty tier wins.

use crate::db::call_metadata::CallMetadataRecord;
use crate::db::conversations::{ConversationRecord, LotQuantityMapping};
use crate::db::trades::{self, NewTradeAudioMapping, TradeAudioMapping, TradeRecord};
use crate::db::{audit, calls};
use crate::matching::company::match_company_names;
use crate::matching::snapshot::{normalize_number, BatchSnapshot};
use crate::matching::{classify, Classification, Finding, MatchFlags, TradeSide};
use crate::types::CallStatus;
use callaudit_common::time;
use callaudit_common::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;

/// Which column the candidate search joins calls on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKey {
    /// AL number, falling back to registration number
    MobileNumber,
    /// Client code against the telephony client id
    ClientCode,
}

/// Trade fields the engine needs, borrowed from either a trade row or a
/// mapping row (mapping rows carry the trade columns for the second pass)
#[derive(Debug, Clone, Copy)]
pub struct TradeView<'a> {
    pub order_id: &'a str,
    pub client_code: &'a str,
    pub al_number: Option<&'a str>,
    pub reg_number: Option<&'a str>,
    pub trade_date: &'a str,
    pub order_placed_time: &'a str,
    pub symbol: &'a str,
    pub scrip_name: &'a str,
    pub strike_price: Option<f64>,
    pub trade_quantity: i64,
    pub trade_price: f64,
}

impl<'a> TradeView<'a> {
    pub fn from_trade(trade: &'a TradeRecord) -> Self {
        Self {
            order_id: &trade.order_id,
            client_code: &trade.client_code,
            al_number: trade.al_number.as_deref(),
            reg_number: trade.reg_number.as_deref(),
            trade_date: &trade.trade_date,
            order_placed_time: &trade.order_placed_time,
            symbol: trade.symbol.as_deref().unwrap_or(""),
            scrip_name: trade.scrip_name.as_deref().unwrap_or(""),
            strike_price: trade.strike_price,
            trade_quantity: trade.trade_quantity,
            trade_price: trade.trade_price,
        }
    }

    pub fn from_mapping(mapping: &'a TradeAudioMapping) -> Self {
        Self {
            order_id: &mapping.order_id,
            client_code: &mapping.client_code,
            al_number: mapping.al_number.as_deref(),
            reg_number: mapping.reg_number.as_deref(),
            trade_date: &mapping.trade_date,
            order_placed_time: &mapping.order_placed_time,
            symbol: mapping.symbol.as_deref().unwrap_or(""),
            scrip_name: mapping.scrip_name.as_deref().unwrap_or(""),
            strike_price: mapping.strike_price,
            trade_quantity: mapping.trade_quantity,
            trade_price: mapping.trade_price,
        }
    }
}

/// Result of one candidate search
#[derive(Debug)]
pub struct CandidateCalls<'a> {
    pub calls: Vec<&'a CallMetadataRecord>,
    pub finding: Finding,
}

impl<'a> CandidateCalls<'a> {
    fn none() -> Self {
        Self {
            calls: Vec::new(),
            finding: Finding::NoCallRecordFound,
        }
    }
}

/// Price tolerance band (lower, upper) for a price tier
///
/// Bands widen with price; see the monotonicity test below.
pub fn price_diff_range(price: f64) -> (f64, f64) {
    if price >= 7500.0 {
        (11.0, 15.0)
    } else if price >= 5000.0 {
        (6.0, 10.0)
    } else if price >= 2500.0 {
        (3.0, 6.0)
    } else if price >= 1250.0 {
        (2.0, 4.0)
    } else if price >= 650.0 {
        (0.90, 2.0)
    } else if price >= 300.0 {
        (0.45, 1.0)
    } else {
        (0.05, 0.45)
    }
}

/// Band check from both centers; either passing counts as a match
pub fn price_within_band(trade_price: f64, conversation_price: f64) -> bool {
    let (lower, upper) = price_diff_range(trade_price);
    let trade_centered = trade_price - lower <= conversation_price
        && conversation_price <= trade_price + upper;

    let (lower2, upper2) = price_diff_range(conversation_price);
    let conversation_centered = conversation_price - lower2 <= trade_price
        && trade_price <= conversation_price + upper2;

    trade_centered || conversation_centered
}

fn join_value(trade: &TradeView<'_>, key: JoinKey) -> Option<String> {
    match key {
        JoinKey::MobileNumber => trade
            .al_number
            .and_then(normalize_number)
            .or_else(|| trade.reg_number.and_then(normalize_number)),
        JoinKey::ClientCode => {
            let code = trade.client_code.trim().to_lowercase();
            (!code.is_empty()).then_some(code)
        }
    }
}

fn key_matches(meta: &CallMetadataRecord, key: JoinKey, value: &str) -> bool {
    match key {
        JoinKey::MobileNumber => meta.client_mobile_number.as_deref() == Some(value),
        JoinKey::ClientCode => meta
            .client_id
            .as_deref()
            .map(|id| id.to_lowercase() == value)
            .unwrap_or(false),
    }
}

/// Candidate call search for one join key
///
/// Tier a: call window contains the order timestamp ("pre-trade").
/// Tier b: nearest call ending before the order time ("pre-trade").
/// Tier c: nearest call ending after ("post-trade").
/// `only_post` skips the pre-trade tiers (used when re-searching for a
/// post-trade alternative after a failed pre-trade confirmation).
pub fn find_candidate_calls<'a>(
    snapshot: &'a BatchSnapshot,
    trade: &TradeView<'_>,
    key: JoinKey,
    only_post: bool,
) -> CandidateCalls<'a> {
    let Some(trade_date) = time::parse_trade_date(trade.trade_date) else {
        return CandidateCalls::none();
    };
    let Some(order_time) = time::parse_order_time(trade.order_placed_time) else {
        return CandidateCalls::none();
    };
    let Some(value) = join_value(trade, key) else {
        return CandidateCalls::none();
    };

    let call_date = time::format_call_date(trade_date);
    let order_time_str = time::format_call_time(order_time);
    let order_datetime = trade_date.and_time(order_time);

    let candidates: Vec<&CallMetadataRecord> = snapshot
        .call_metadata
        .iter()
        .filter(|m| m.call_start_date.as_deref() == Some(call_date.as_str()))
        .filter(|m| m.has_window())
        .filter(|m| key_matches(m, key, &value))
        .collect();

    if !only_post {
        // Tier a: order timestamp inside the call window
        for &meta in &candidates {
            let start = meta
                .call_start_date
                .as_deref()
                .zip(meta.call_start_time.as_deref())
                .and_then(|(d, t)| time::call_datetime(d, t));
            let end = meta
                .call_end_date
                .as_deref()
                .or(meta.call_start_date.as_deref())
                .zip(meta.call_end_time.as_deref())
                .and_then(|(d, t)| time::call_datetime(d, t));
            if let (Some(start), Some(end)) = (start, end) {
                if start <= order_datetime && order_datetime <= end {
                    return CandidateCalls {
                        calls: vec![meta],
                        finding: Finding::PreTradeFound,
                    };
                }
            }
        }

        // Tier b: nearest call ending before the order time
        let mut pre_trade: Vec<&CallMetadataRecord> = candidates
            .iter()
            .copied()
            .filter(|m| m.call_end_time.as_deref().unwrap_or("") < order_time_str.as_str())
            .collect();
        pre_trade.sort_by(|a, b| b.call_end_time.cmp(&a.call_end_time));
        if !pre_trade.is_empty() {
            return CandidateCalls {
                calls: pre_trade,
                finding: Finding::PreTradeFound,
            };
        }
    }

    // Tier c: nearest call ending after the order time
    let mut post_trade: Vec<&CallMetadataRecord> = candidates
        .iter()
        .copied()
        .filter(|m| m.call_end_time.as_deref().unwrap_or("") >= order_time_str.as_str())
        .collect();
    post_trade.sort_by(|a, b| a.call_end_time.cmp(&b.call_end_time));
    if !post_trade.is_empty() {
        return CandidateCalls {
            calls: post_trade,
            finding: Finding::PostTradeFound,
        };
    }

    CandidateCalls::none()
}

/// Full tiered search: mobile-number join first, client-code join only
/// if the first yields nothing
pub fn tiered_search<'a>(
    snapshot: &'a BatchSnapshot,
    trade: &TradeView<'_>,
    only_post: bool,
) -> CandidateCalls<'a> {
    let by_number = find_candidate_calls(snapshot, trade, JoinKey::MobileNumber, only_post);
    if !by_number.calls.is_empty() {
        return by_number;
    }
    find_candidate_calls(snapshot, trade, JoinKey::ClientCode, only_post)
}

// ============================================================================
// Conversation aggregation and flag evaluation
// ============================================================================

/// Lot-size reference row for a trade symbol whose name variants cover
/// one of the conversation's script names
pub fn lot_mapping_for<'a>(
    snapshot: &'a BatchSnapshot,
    symbol: &str,
    mentions: &[&ConversationRecord],
) -> Option<&'a LotQuantityMapping> {
    if symbol.is_empty() {
        return None;
    }
    let symbol_bare = symbol.replace("EQ", "");
    for mapping in &snapshot.lot_mappings {
        if mapping.symbol != symbol && mapping.symbol != symbol_bare {
            continue;
        }
        for mention in mentions {
            let script = mention.script_name.to_lowercase();
            if script.is_empty() {
                continue;
            }
            for variant in mapping.name_variants() {
                let variant = variant.to_lowercase();
                if script == variant || match_company_names(&script, &variant) {
                    return Some(mapping);
                }
            }
        }
    }
    None
}

fn mention_matches_trade(
    snapshot: &BatchSnapshot,
    trade: &TradeView<'_>,
    mention: &ConversationRecord,
) -> bool {
    lot_mapping_for(snapshot, trade.symbol, &[mention]).is_some()
        || match_company_names(&mention.script_name, trade.scrip_name)
        || match_company_names(&mention.script_name, trade.symbol)
}

/// Aggregated view of the conversation mentions relevant to one trade
#[derive(Debug, Default)]
pub struct ConversationAggregate {
    /// Sum of lot quantities across matched mentions
    pub lot_quantity: i64,
    /// Average trade price across matched mentions carrying one
    pub trade_price: f64,
    /// Concatenated script names of matched mentions
    pub script_name: String,
    /// Every mention had an empty script name (single-instrument call)
    pub all_scripts_empty: bool,
    pub mention_count: usize,
    pub any_current_market_price: bool,
    pub group_total_quantity: f64,
    pub group_average_quantity: f64,
    pub group_average_price: f64,
    pub group_average_strike: f64,
    pub any_strike_price_equal: bool,
}

/// Aggregate the call's extracted mentions against a trade
///
/// A call whose mentions all lack a script name is treated as
/// single-instrument and aggregated wholesale; likewise when every
/// mention names the same instrument. Otherwise only mentions whose
/// script matches the trade contribute.
pub fn aggregate_conversation(
    snapshot: &BatchSnapshot,
    trade: &TradeView<'_>,
    mentions: &[&ConversationRecord],
) -> ConversationAggregate {
    let mut aggregate = ConversationAggregate {
        all_scripts_empty: mentions.iter().all(|m| m.script_name.is_empty()),
        mention_count: mentions.len(),
        ..Default::default()
    };

    let all_same_script = {
        let named: Vec<&str> = mentions
            .iter()
            .map(|m| m.script_name.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        !named.is_empty() && named.iter().all(|s| *s == named[0]) && named.len() == mentions.len()
    };

    let matched: Vec<&ConversationRecord> = mentions
        .iter()
        .copied()
        .filter(|&m| {
            aggregate.all_scripts_empty
                || all_same_script
                || mention_matches_trade(snapshot, trade, m)
        })
        .collect();

    let mut price_sum = 0.0;
    let mut price_count = 0usize;
    let mut quantity_sum = 0.0;
    let mut strike_sum = 0.0;
    let mut names = Vec::new();

    for &mention in &matched {
        if let Some(lot) = mention.lot_quantity {
            aggregate.lot_quantity += lot as i64;
            quantity_sum += lot;
        }
        if let Some(price) = mention.trade_price {
            if price != 0.0 {
                price_sum += price;
                price_count += 1;
            }
        }
        if let Some(strike) = mention.strike_price {
            strike_sum += strike;
            if let Some(trade_strike) = trade.strike_price {
                if trade_strike != 0.0
                    && strike != 0.0
                    && trade_strike as i64 == strike as i64
                {
                    aggregate.any_strike_price_equal = true;
                }
            }
        }
        if mention.current_market_price.as_deref() == Some("YES") {
            aggregate.any_current_market_price = true;
        }
        if !mention.script_name.is_empty()
            && mention_matches_trade(snapshot, trade, mention)
        {
            names.push(mention.script_name.clone());
        }
    }

    if price_count > 0 {
        aggregate.trade_price = price_sum / price_count as f64;
    }
    aggregate.script_name = names.join(" ");

    if !matched.is_empty() {
        let n = matched.len() as f64;
        aggregate.group_total_quantity = quantity_sum;
        aggregate.group_average_quantity = quantity_sum / n;
        aggregate.group_average_price = price_sum / n;
        aggregate.group_average_strike = strike_sum / n;
    }

    aggregate
}

fn script_matches(
    snapshot: &BatchSnapshot,
    trade: &TradeView<'_>,
    aggregate: &ConversationAggregate,
    mentions: &[&ConversationRecord],
) -> bool {
    let conv = aggregate.script_name.as_str();
    if !conv.is_empty() {
        if !trade.symbol.is_empty()
            && (conv.contains(trade.symbol) || trade.symbol.contains(conv))
        {
            return true;
        }
        if !trade.scrip_name.is_empty()
            && (conv.contains(trade.scrip_name) || trade.scrip_name.contains(conv))
        {
            return true;
        }
        if match_company_names(trade.symbol, conv) || match_company_names(trade.scrip_name, conv) {
            return true;
        }
    }
    // Static variant-table fallback when direct comparison fails
    lot_mapping_for(snapshot, trade.symbol, mentions).is_some()
}

fn price_matches(trade: &TradeView<'_>, aggregate: &ConversationAggregate) -> bool {
    let mut matched =
        aggregate.trade_price != 0.0 && price_within_band(trade.trade_price, aggregate.trade_price);

    // Exact strike agreement is an alternative sufficient condition
    if !matched && aggregate.any_strike_price_equal {
        matched = true;
    }
    if !matched && aggregate.mention_count > 0 {
        let avg_price_equal = (aggregate.group_average_price - trade.trade_price).abs()
            < f64::EPSILON;
        let avg_strike_equal = trade
            .strike_price
            .map(|s| (aggregate.group_average_strike - s).abs() < f64::EPSILON && s != 0.0)
            .unwrap_or(false);
        if avg_price_equal || avg_strike_equal {
            matched = true;
        }
    }
    if !matched && aggregate.any_current_market_price {
        matched = true;
    }
    matched
}

fn quantity_matches(
    snapshot: &BatchSnapshot,
    trade: &TradeView<'_>,
    aggregate: &ConversationAggregate,
    mentions: &[&ConversationRecord],
) -> bool {
    if trade.trade_quantity <= aggregate.lot_quantity {
        return true;
    }

    // The order may have filled across several trade legs
    let order_total = snapshot.order_quantity_total(trade.order_id);
    if order_total > 0 && order_total <= aggregate.lot_quantity {
        return true;
    }

    // Spoken quantities are often lots, not shares
    if let Some(mapping) = lot_mapping_for(snapshot, trade.symbol, mentions) {
        if let Some(multiplier) = mapping.quantity {
            let effective = order_total.max(trade.trade_quantity);
            if effective <= aggregate.lot_quantity * multiplier {
                return true;
            }
        }
    }
    false
}

/// Evaluate the three confirmation dimensions for one trade against one
/// call's conversation
pub fn evaluate_flags(
    snapshot: &BatchSnapshot,
    trade: &TradeView<'_>,
    mentions: &[&ConversationRecord],
) -> MatchFlags {
    let aggregate = aggregate_conversation(snapshot, trade, mentions);

    let mut flags = MatchFlags {
        script: script_matches(snapshot, trade, &aggregate, mentions),
        price: price_matches(trade, &aggregate),
        quantity: quantity_matches(snapshot, trade, &aggregate, mentions),
    };

    // A market-price reference with neither script nor quantity agreement
    // is not evidence of this trade
    if aggregate.any_current_market_price && !flags.script && !flags.quantity {
        flags.price = false;
    }
    // A single unmatched mention whose only agreement is quantity is noise
    if aggregate.mention_count == 1 && !flags.script && flags.quantity && !flags.price {
        flags.quantity = false;
    }
    if !flags.quantity && aggregate.mention_count > 0 {
        let quantity = trade.trade_quantity as f64;
        if (aggregate.group_total_quantity - quantity).abs() < f64::EPSILON
            || (aggregate.group_average_quantity - quantity).abs() < f64::EPSILON
        {
            flags.quantity = true;
        }
    }
    flags
}

/// Evaluation outcome for one mapping row
#[derive(Debug)]
pub struct MappingEvaluation {
    pub flags: Option<MatchFlags>,
    pub classification: Classification,
    pub call_id: Option<i64>,
}

/// Side a mapping's first-pass tag puts it on
pub fn side_of(voice_recording_confirmations: &str) -> TradeSide {
    if voice_recording_confirmations
        .to_lowercase()
        .contains("pre trade")
    {
        TradeSide::Pre
    } else {
        TradeSide::Post
    }
}

/// Re-evaluate one mapping row against the extracted conversation
pub fn evaluate_mapping(
    snapshot: &BatchSnapshot,
    mapping: &TradeAudioMapping,
) -> MappingEvaluation {
    let voice = mapping.voice_recording_confirmations.as_str();
    let eligible = matches!(
        voice,
        "Pre trade found" | "No pre trade found" | "Post trade found"
    );
    if !eligible {
        return MappingEvaluation {
            flags: None,
            classification: Classification::bare(Finding::NoCallRecordFound),
            call_id: None,
        };
    }

    let Some(call) = snapshot.call_by_audio_name(&mapping.audio_file_name) else {
        return MappingEvaluation {
            flags: None,
            classification: Classification::bare(Finding::NoCallRecordFound),
            call_id: None,
        };
    };

    if call.status == CallStatus::UnsupportedLanguage {
        return MappingEvaluation {
            flags: None,
            classification: Classification::bare(Finding::UnsupportedLanguage),
            call_id: Some(call.id),
        };
    }

    let mentions = snapshot.conversations_for_call(call.id);
    if mentions.is_empty() {
        return MappingEvaluation {
            flags: None,
            classification: Classification::bare(Finding::NonObservatoryCall),
            call_id: Some(call.id),
        };
    }

    let trade = TradeView::from_mapping(mapping);
    let flags = evaluate_flags(snapshot, &trade, &mentions);
    let (_, classification) = classify(flags, side_of(voice));

    MappingEvaluation {
        flags: Some(flags),
        classification,
        call_id: Some(call.id),
    }
}

// ============================================================================
// First pass: mapping creation
// ============================================================================

const MAPPING_INSERT_CHUNK: usize = 10_000;

/// First matching pass: create candidate mapping rows for every trade
///
/// Trades with no candidate at any tier are tagged
/// `No call record found`; trades whose every candidate recording is in
/// an unsupported language are tagged `Unsupported Language` with the
/// first candidate's audio reference. Returns the number of mapping
/// rows created.
pub async fn run_first_pass(
    pool: &SqlitePool,
    batch_id: i64,
    supported_languages: &[String],
) -> Result<i64> {
    let snapshot = BatchSnapshot::load(pool, batch_id).await?;
    if snapshot.call_metadata.is_empty() {
        tracing::warn!(batch_id, "No call metadata; skipping trade matching");
        return Ok(0);
    }

    let unsupported: HashSet<&str> = snapshot
        .calls
        .iter()
        .filter(|call| {
            call.language
                .as_deref()
                .map(|lang| !supported_languages.iter().any(|s| s == lang))
                .unwrap_or(false)
        })
        .map(|call| call.audio_name.as_str())
        .collect();

    let mut rows_to_insert: Vec<NewTradeAudioMapping> = Vec::new();

    for trade in &snapshot.trades {
        let view = TradeView::from_trade(trade);
        let result = tiered_search(&snapshot, &view, false);

        if result.finding == Finding::NoCallRecordFound {
            trades::update_trade_verdict(
                pool,
                trade.id,
                Finding::NoCallRecordFound.as_str(),
                "",
                "",
                None,
                None,
            )
            .await?;
            continue;
        }

        let mut inserted = false;
        for meta in &result.calls {
            if unsupported.contains(meta.recording_file_name.as_str()) {
                continue;
            }
            inserted = true;
            rows_to_insert.push(NewTradeAudioMapping::from_trade(
                trade,
                result.finding.as_str(),
                &meta.recording_file_name,
            ));
        }

        if !inserted {
            // Every candidate recording is unsupported
            let audio = &result.calls[0].recording_file_name;
            let call_ref = snapshot.call_by_audio_name(audio).map(|c| c.id);
            trades::update_trade_verdict(
                pool,
                trade.id,
                Finding::UnsupportedLanguage.as_str(),
                "",
                "",
                Some(audio.as_str()),
                call_ref,
            )
            .await?;
        }
    }

    let mut total = 0;
    for chunk in rows_to_insert.chunks(MAPPING_INSERT_CHUNK) {
        total += trades::insert_mappings(pool, chunk).await?;
        tracing::info!(batch_id, inserted = chunk.len(), "Mapping chunk inserted");
    }
    Ok(total)
}

/// Backfill "No trade data found" answers for calls with no mapping row
pub async fn fill_audio_not_found(pool: &SqlitePool, batch_id: i64) -> Result<i64> {
    let call_records = calls::load_calls_for_batch(pool, batch_id).await?;
    let mut processed = 0;

    for call in call_records {
        if trades::mapping_exists_for_audio(pool, &call.audio_name).await? {
            continue;
        }
        for (section_id, sub_section_id, question_id) in [(1, 1, 1), (1, 2, 2), (1, 2, 3)] {
            audit::insert_or_update_audit_answer(
                pool,
                call.process_id,
                call.id,
                section_id,
                sub_section_id,
                question_id,
                "No trade data found",
            )
            .await?;
        }
        processed += 1;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_band_widens_with_price() {
        let tiers = [100.0, 300.0, 650.0, 1250.0, 2500.0, 5000.0, 7500.0];
        let mut previous_width = 0.0;
        for price in tiers {
            let (lower, upper) = price_diff_range(price);
            let width = lower + upper;
            assert!(
                width >= previous_width,
                "band narrowed at price {}",
                price
            );
            previous_width = width;
        }
    }

    #[test]
    fn price_band_examples_at_1000() {
        // 650-1249 tier carries (0.90, 2)
        assert!(price_within_band(1000.0, 1001.5));
        assert!(price_within_band(1000.0, 1002.0));
        assert!(price_within_band(1000.0, 999.2));
        assert!(!price_within_band(1000.0, 1004.0));
        assert!(!price_within_band(1000.0, 990.0));
    }

    #[test]
    fn price_band_is_checked_from_both_centers() {
        // Trade-centered: 653.5 < 655 - 0.90, rejected. Conversation-
        // centered: 655 lies inside [653.5 - 0.90, 653.5 + 2], accepted.
        assert!(price_within_band(655.0, 653.5));
    }
}
