//! Per-batch in-memory snapshot for the matching engine
//!
//! Loaded once per batch, treated as read-only afterwards. One day's
//! volume is a bounded dataset, so the whole working set fits in memory
//! and the engine never touches the database between trades.

use crate::db::call_metadata::{self, CallMetadataRecord};
use crate::db::calls::{self, CallRecord};
use crate::db::conversations::{self, ConversationRecord, LotQuantityMapping};
use crate::db::trades::{self, TradeAudioMapping, TradeRecord};
use callaudit_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;

/// Normalize an order id for comparison
///
/// Feeds mix "123.0" and "123" for the same order; numeric values are
/// collapsed through float -> integer, everything else passes through.
pub fn normalize_order_id(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => format!("{}", value as i64),
        _ => raw.trim().to_string(),
    }
}

/// Normalize a phone-style number the same way ("9876543210.0" -> "9876543210")
pub fn normalize_number(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(format!("{}", value as i64)),
        _ => Some(trimmed.to_string()),
    }
}

/// All matching-engine inputs for one batch
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub batch_id: i64,
    pub call_metadata: Vec<CallMetadataRecord>,
    pub calls: Vec<CallRecord>,
    pub trades: Vec<TradeRecord>,
    pub mappings: Vec<TradeAudioMapping>,
    pub conversations: Vec<ConversationRecord>,
    pub lot_mappings: Vec<LotQuantityMapping>,
    conversations_by_call: HashMap<i64, Vec<usize>>,
    order_totals: HashMap<String, i64>,
}

impl BatchSnapshot {
    /// Load everything the engine needs for one batch
    pub async fn load(pool: &SqlitePool, batch_id: i64) -> Result<Self> {
        let call_metadata = call_metadata::load_call_metadata_for_batch(pool, batch_id).await?;
        let calls = calls::load_calls_for_batch(pool, batch_id).await?;
        let trades = trades::load_trades_for_batch(pool, batch_id).await?;
        let mappings = trades::load_mappings_for_batch(pool, batch_id).await?;
        let conversations = conversations::load_conversations_for_batch(pool, batch_id).await?;
        let lot_mappings = conversations::load_lot_mappings(pool).await?;

        Ok(Self::from_parts(
            batch_id,
            call_metadata,
            calls,
            trades,
            mappings,
            conversations,
            lot_mappings,
        ))
    }

    /// Assemble a snapshot from already-loaded rows (tests use this)
    pub fn from_parts(
        batch_id: i64,
        call_metadata: Vec<CallMetadataRecord>,
        calls: Vec<CallRecord>,
        trades: Vec<TradeRecord>,
        mappings: Vec<TradeAudioMapping>,
        conversations: Vec<ConversationRecord>,
        lot_mappings: Vec<LotQuantityMapping>,
    ) -> Self {
        let mut conversations_by_call: HashMap<i64, Vec<usize>> = HashMap::new();
        for (idx, conversation) in conversations.iter().enumerate() {
            conversations_by_call
                .entry(conversation.call_id)
                .or_default()
                .push(idx);
        }

        let mut order_totals: HashMap<String, i64> = HashMap::new();
        for trade in &trades {
            *order_totals
                .entry(normalize_order_id(&trade.order_id))
                .or_default() += trade.trade_quantity;
        }

        Self {
            batch_id,
            call_metadata,
            calls,
            trades,
            mappings,
            conversations,
            lot_mappings,
            conversations_by_call,
            order_totals,
        }
    }

    /// Call row by recording file name
    pub fn call_by_audio_name(&self, audio_name: &str) -> Option<&CallRecord> {
        self.calls.iter().find(|c| c.audio_name == audio_name)
    }

    /// Metadata row by recording file name and call date
    pub fn call_meta_by_recording(
        &self,
        call_date: &str,
        recording_file_name: &str,
    ) -> Option<&CallMetadataRecord> {
        self.call_metadata.iter().find(|m| {
            m.call_start_date.as_deref() == Some(call_date)
                && m.recording_file_name == recording_file_name
        })
    }

    /// All conversation mentions extracted from one call
    pub fn conversations_for_call(&self, call_id: i64) -> Vec<&ConversationRecord> {
        self.conversations_by_call
            .get(&call_id)
            .map(|indices| indices.iter().map(|&i| &self.conversations[i]).collect())
            .unwrap_or_default()
    }

    /// Total quantity across all trade legs sharing an order id
    pub fn order_quantity_total(&self, order_id: &str) -> i64 {
        self.order_totals
            .get(&normalize_order_id(order_id))
            .copied()
            .unwrap_or(0)
    }

    /// Mapping rows belonging to one trade
    pub fn mappings_for_trade(&self, trade_metadata_id: i64) -> Vec<&TradeAudioMapping> {
        self.mappings
            .iter()
            .filter(|m| m.trade_metadata_id == trade_metadata_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_normalize_through_float() {
        assert_eq!(normalize_order_id("123.0"), "123");
        assert_eq!(normalize_order_id(" 123 "), "123");
        assert_eq!(normalize_order_id("oeruewi762"), "oeruewi762");
    }

    #[test]
    fn numbers_normalize_or_vanish() {
        assert_eq!(normalize_number("9876543210.0").as_deref(), Some("9876543210"));
        assert_eq!(normalize_number("  "), None);
        assert_eq!(normalize_number("AL-99").as_deref(), Some("AL-99"));
    }
}
