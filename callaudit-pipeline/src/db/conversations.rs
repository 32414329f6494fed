//! Conversation extraction and lot-size reference persistence
//!
//! Conversation rows are written by the LLM extraction step and consumed
//! read-only by the matching engine. Lot mappings are a static reference
//! table: symbol -> lot multiplier plus known spoken-name variants.

use callaudit_common::Result;
use sqlx::{Row, SqlitePool};

/// One extracted stock mention from a call transcript
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: i64,
    pub call_id: i64,
    /// Spoken instrument name; empty when the extractor found none
    pub script_name: String,
    pub lot_quantity: Option<f64>,
    pub trade_price: Option<f64>,
    pub strike_price: Option<f64>,
    /// "YES" when the mention referenced the current market price
    pub current_market_price: Option<String>,
    pub batch_id: i64,
}

/// Symbol -> lot multiplier reference row
#[derive(Debug, Clone)]
pub struct LotQuantityMapping {
    pub id: i64,
    pub symbol: String,
    pub script_name: Option<String>,
    pub variation1: Option<String>,
    pub variation2: Option<String>,
    pub variation3: Option<String>,
    pub quantity: Option<i64>,
}

impl LotQuantityMapping {
    /// All spoken-name variants carried by this row
    pub fn name_variants(&self) -> impl Iterator<Item = &str> {
        [
            self.script_name.as_deref(),
            self.variation1.as_deref(),
            self.variation2.as_deref(),
            self.variation3.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

fn conversation_from_row(row: &sqlx::sqlite::SqliteRow) -> ConversationRecord {
    ConversationRecord {
        id: row.get("id"),
        call_id: row.get("call_id"),
        script_name: row.get("script_name"),
        lot_quantity: row.get("lot_quantity"),
        trade_price: row.get("trade_price"),
        strike_price: row.get("strike_price"),
        current_market_price: row.get("current_market_price"),
        batch_id: row.get("batch_id"),
    }
}

fn lot_mapping_from_row(row: &sqlx::sqlite::SqliteRow) -> LotQuantityMapping {
    LotQuantityMapping {
        id: row.get("id"),
        symbol: row.get("symbol"),
        script_name: row.get("script_name"),
        variation1: row.get("variation1"),
        variation2: row.get("variation2"),
        variation3: row.get("variation3"),
        quantity: row.get("quantity"),
    }
}

/// Insert one conversation row
pub async fn insert_conversation(pool: &SqlitePool, record: &ConversationRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO call_conversations (
            call_id, script_name, lot_quantity, trade_price, strike_price,
            current_market_price, batch_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.call_id)
    .bind(&record.script_name)
    .bind(record.lot_quantity)
    .bind(record.trade_price)
    .bind(record.strike_price)
    .bind(&record.current_market_price)
    .bind(record.batch_id)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Load all conversation rows for a batch
pub async fn load_conversations_for_batch(
    pool: &SqlitePool,
    batch_id: i64,
) -> Result<Vec<ConversationRecord>> {
    let rows = sqlx::query("SELECT * FROM call_conversations WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(conversation_from_row).collect())
}

/// Insert one lot-size reference row
pub async fn insert_lot_mapping(pool: &SqlitePool, mapping: &LotQuantityMapping) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO lot_quantity_mappings
            (symbol, script_name, variation1, variation2, variation3, quantity)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&mapping.symbol)
    .bind(&mapping.script_name)
    .bind(&mapping.variation1)
    .bind(&mapping.variation2)
    .bind(&mapping.variation3)
    .bind(mapping.quantity)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Load the full lot-size reference table
pub async fn load_lot_mappings(pool: &SqlitePool) -> Result<Vec<LotQuantityMapping>> {
    let rows = sqlx::query("SELECT * FROM lot_quantity_mappings")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(lot_mapping_from_row).collect())
}
