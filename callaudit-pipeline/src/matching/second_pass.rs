//! Second matching pass
//!
//! Conversation extraction arrives asynchronously from the LLM step, so
//! mappings tagged `Pre/Post trade found` by the first pass are
//! re-evaluated here once script/price/quantity data exists per call.
//! Flag updates are grouped by which columns flip to 1 and applied in
//! large row batches to bound database round-trips; the best-scoring
//! mapping per trade then becomes the trade's final verdict.

use crate::db::trades::{self, TradeAudioMapping};
use crate::db::{audit, calls};
use crate::matching::engine::{evaluate_mapping, side_of};
use crate::matching::{classify, BatchSnapshot, Classification, Finding, MatchFlags};
use crate::types::CallStatus;
use callaudit_common::Result;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};

/// Flag-update statements carry at most this many row ids each
const FLAG_UPDATE_CHUNK: usize = 10_000;

/// Run the full second pass for a batch
///
/// `batch_size` bounds how many mapping rows are evaluated between flag
/// commits (10 000 in production).
pub async fn run_second_pass(pool: &SqlitePool, batch_id: i64, batch_size: usize) -> Result<()> {
    let pending_trades =
        trades::load_trades_by_confirmation(pool, batch_id, Finding::NonObservatoryCall.as_str())
            .await?;
    if pending_trades.is_empty() {
        tracing::info!(batch_id, "No trades awaiting re-evaluation");
        return Ok(());
    }
    let trade_ids: HashSet<i64> = pending_trades.iter().map(|t| t.id).collect();

    let all_mappings = trades::load_mappings_for_batch(pool, batch_id).await?;
    let mappings: Vec<TradeAudioMapping> = all_mappings
        .into_iter()
        .filter(|m| trade_ids.contains(&m.trade_metadata_id))
        .collect();
    if mappings.is_empty() {
        tracing::info!(batch_id, "No mapping rows for pending trades");
        return Ok(());
    }

    // Start from a clean slate so stale flags from a prior run can't leak
    let ids: Vec<i64> = mappings.iter().map(|m| m.id).collect();
    for chunk in ids.chunks(FLAG_UPDATE_CHUNK) {
        trades::reset_mapping_flags(pool, chunk).await?;
    }

    let snapshot = BatchSnapshot::load(pool, batch_id).await?;

    tracing::info!(
        batch_id,
        trades = pending_trades.len(),
        mappings = mappings.len(),
        "Second pass starting"
    );

    for (index, chunk) in mappings.chunks(batch_size).enumerate() {
        evaluate_and_flag(pool, &snapshot, chunk).await?;
        tracing::info!(
            batch_id,
            chunk = index + 1,
            rows = chunk.len(),
            "Second pass chunk flagged"
        );
    }

    finalize_trades(pool, batch_id, &trade_ids).await?;

    tracing::info!(batch_id, "Second pass completed");
    Ok(())
}

/// Evaluate a bounded index slice of the batch's eligible mapping rows
///
/// Serves the horizontal fan-out endpoint: several machines each take a
/// disjoint [start, end) range. Only flags are written here; trade
/// finalization stays with the orchestrating instance.
pub async fn run_second_pass_slice(
    pool: &SqlitePool,
    batch_id: i64,
    start_index: usize,
    end_index: usize,
) -> Result<usize> {
    let mappings = trades::load_mappings_for_batch(pool, batch_id).await?;
    if start_index >= mappings.len() || start_index >= end_index {
        return Ok(0);
    }
    let end = end_index.min(mappings.len());
    let slice = &mappings[start_index..end];

    let snapshot = BatchSnapshot::load(pool, batch_id).await?;
    evaluate_and_flag(pool, &snapshot, slice).await?;
    Ok(slice.len())
}

/// Evaluate mappings and apply grouped flag updates
async fn evaluate_and_flag(
    pool: &SqlitePool,
    snapshot: &BatchSnapshot,
    mappings: &[TradeAudioMapping],
) -> Result<()> {
    // Group ids by which flags flip to 1; at most 7 non-empty groups
    let mut groups: HashMap<MatchFlags, Vec<i64>> = HashMap::new();

    for mapping in mappings {
        let evaluation = evaluate_mapping(snapshot, mapping);
        let skip = matches!(
            evaluation.classification.tag1,
            Finding::NoCallRecordFound | Finding::NonObservatoryCall | Finding::UnsupportedLanguage
        );
        if skip {
            continue;
        }
        if let Some(flags) = evaluation.flags {
            if flags.score() > 0 {
                groups.entry(flags).or_default().push(mapping.id);
            }
        }
    }

    for (flags, ids) in groups {
        for chunk in ids.chunks(FLAG_UPDATE_CHUNK) {
            trades::set_mapping_flags(pool, chunk, flags.script, flags.price, flags.quantity)
                .await?;
        }
    }
    Ok(())
}

/// Score a mapping row from its stored flags
fn stored_classification(mapping: &TradeAudioMapping) -> (u8, Classification) {
    let flags = MatchFlags {
        script: mapping.is_script,
        price: mapping.is_price,
        quantity: mapping.is_quantity,
    };
    classify(flags, side_of(&mapping.voice_recording_confirmations))
}

/// Pick the best-scoring mapping; ties go to the first found, and a
/// perfect score short-circuits the scan
pub fn find_best_mapping<'a>(
    rows: &'a [&'a TradeAudioMapping],
) -> Option<(&'a TradeAudioMapping, Classification)> {
    let mut best: Option<(&TradeAudioMapping, u8, Classification)> = None;
    for row in rows {
        let (score, classification) = stored_classification(row);
        let better = match &best {
            Some((_, best_score, _)) => score > *best_score,
            None => true,
        };
        if better {
            let done = score == 3;
            best = Some((row, score, classification));
            if done {
                break;
            }
        }
    }
    best.map(|(row, _, classification)| (row, classification))
}

/// Write each pending trade's final verdict from its best mapping
async fn finalize_trades(
    pool: &SqlitePool,
    batch_id: i64,
    trade_ids: &HashSet<i64>,
) -> Result<()> {
    let mappings = trades::load_mappings_for_batch(pool, batch_id).await?;
    let call_records = calls::load_calls_for_batch(pool, batch_id).await?;

    let pending_trades =
        trades::load_trades_by_confirmation(pool, batch_id, Finding::NonObservatoryCall.as_str())
            .await?;

    for trade in pending_trades {
        if !trade_ids.contains(&trade.id) {
            continue;
        }
        let rows: Vec<&TradeAudioMapping> = mappings
            .iter()
            .filter(|m| m.trade_metadata_id == trade.id)
            .collect();
        if rows.is_empty() {
            continue;
        }

        let Some((mut best, mut classification)) = find_best_mapping(&rows) else {
            continue;
        };

        // A weak verdict over an unsupported-language recording is really
        // an unsupported-language verdict
        if matches!(
            classification.tag1,
            Finding::NoPreTradeFound | Finding::NoPostTradeFound | Finding::NonObservatoryCall
        ) {
            let unsupported = call_records.iter().find(|c| {
                c.audio_name == rows[0].audio_file_name
                    && c.status == CallStatus::UnsupportedLanguage
            });
            if unsupported.is_some() {
                classification = Classification::bare(Finding::UnsupportedLanguage);
                best = rows[0];
            }
        }

        let Some(call) = call_records
            .iter()
            .find(|c| c.audio_name == best.audio_file_name)
        else {
            tracing::warn!(trade_id = trade.id, audio = %best.audio_file_name, "Call not found for best mapping");
            continue;
        };

        trades::update_trade_verdict(
            pool,
            trade.id,
            classification.tag1.as_str(),
            classification.tag2,
            &classification.tag3,
            Some(best.audio_file_name.as_str()),
            Some(call.id),
        )
        .await?;
        trades::update_trade_verdict_for_order(
            pool,
            &trade.client_code,
            &trade.order_id,
            classification.tag1.as_str(),
            classification.tag2,
            &classification.tag3,
            &best.audio_file_name,
            call.id,
        )
        .await?;

        // The matching verdict is audit question 1; rewrite it with the
        // tag pair as evidence
        audit::delete_audit_answer(pool, call.id, 1, 1).await?;
        let answer_id = audit::insert_audit_answer(
            pool,
            call.process_id,
            call.id,
            1,
            1,
            1,
            classification.tag1.as_str(),
        )
        .await?;
        let evidence = if classification.tag3.is_empty() {
            classification.tag2.to_string()
        } else {
            format!("{};{}", classification.tag2, classification.tag3)
        };
        audit::insert_audit_timing(pool, answer_id, 0.0, 0.0, "", &evidence).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(id: i64, voice: &str, script: bool, price: bool, quantity: bool) -> TradeAudioMapping {
        TradeAudioMapping {
            id,
            trade_metadata_id: 1,
            order_id: "1".to_string(),
            client_code: "C1".to_string(),
            al_number: None,
            reg_number: None,
            trade_date: "20250812".to_string(),
            order_placed_time: "093000".to_string(),
            symbol: None,
            scrip_name: None,
            strike_price: None,
            trade_quantity: 0,
            trade_price: 0.0,
            is_script: script,
            is_price: price,
            is_quantity: quantity,
            voice_recording_confirmations: voice.to_string(),
            audio_file_name: format!("call-{}.wav", id),
            batch_id: 1,
        }
    }

    #[test]
    fn best_mapping_prefers_higher_score() {
        let weak = mapping(1, "Pre trade found", true, false, false);
        let strong = mapping(2, "Pre trade found", true, true, false);
        let rows = vec![&weak, &strong];

        let (best, classification) = find_best_mapping(&rows).unwrap();
        assert_eq!(best.id, 2);
        assert_eq!(classification.tag1, Finding::PreTradeFound);
        assert_eq!(classification.tag3, "Quantity");
    }

    #[test]
    fn best_mapping_ties_go_to_first_found() {
        let first = mapping(1, "Post trade found", true, true, false);
        let second = mapping(2, "Post trade found", true, false, true);
        let rows = vec![&first, &second];

        let (best, _) = find_best_mapping(&rows).unwrap();
        assert_eq!(best.id, 1);
    }

    #[test]
    fn perfect_match_short_circuits() {
        let perfect = mapping(1, "Pre trade found", true, true, true);
        let other = mapping(2, "Pre trade found", true, true, true);
        let rows = vec![&perfect, &other];

        let (best, classification) = find_best_mapping(&rows).unwrap();
        assert_eq!(best.id, 1);
        assert_eq!(classification.tag2, "Details matching");
    }
}
