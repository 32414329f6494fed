//! Trade metadata and trade-audio mapping persistence
//!
//! Trade rows are immutable after ingestion except for the matching
//! verdict columns the engine back-propagates. Mapping rows are created
//! by the first matching pass and annotated (flags flipped to 1) by the
//! second; neither is ever deleted.

use callaudit_common::Result;
use sqlx::{Row, SqlitePool};

/// One raw trade leg
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub id: i64,
    pub order_id: String,
    pub client_code: String,
    pub al_number: Option<String>,
    pub reg_number: Option<String>,
    /// YYYYMMDD
    pub trade_date: String,
    /// HHMMSS
    pub order_placed_time: String,
    pub symbol: Option<String>,
    pub scrip_name: Option<String>,
    pub strike_price: Option<f64>,
    pub trade_quantity: i64,
    pub trade_price: f64,
    pub batch_id: i64,
    pub voice_recording_confirmations: Option<String>,
    pub audio_file_name: Option<String>,
    pub audio_call_ref: Option<i64>,
}

/// One candidate (trade, call) link
#[derive(Debug, Clone)]
pub struct TradeAudioMapping {
    pub id: i64,
    pub trade_metadata_id: i64,
    pub order_id: String,
    pub client_code: String,
    pub al_number: Option<String>,
    pub reg_number: Option<String>,
    pub trade_date: String,
    pub order_placed_time: String,
    pub symbol: Option<String>,
    pub scrip_name: Option<String>,
    pub strike_price: Option<f64>,
    pub trade_quantity: i64,
    pub trade_price: f64,
    pub is_script: bool,
    pub is_price: bool,
    pub is_quantity: bool,
    pub voice_recording_confirmations: String,
    pub audio_file_name: String,
    pub batch_id: i64,
}

/// Fields for a new mapping row, copied from the trade it links
#[derive(Debug, Clone)]
pub struct NewTradeAudioMapping {
    pub trade_metadata_id: i64,
    pub order_id: String,
    pub client_code: String,
    pub al_number: Option<String>,
    pub reg_number: Option<String>,
    pub trade_date: String,
    pub order_placed_time: String,
    pub symbol: Option<String>,
    pub scrip_name: Option<String>,
    pub strike_price: Option<f64>,
    pub trade_quantity: i64,
    pub trade_price: f64,
    pub voice_recording_confirmations: String,
    pub audio_file_name: String,
    pub batch_id: i64,
}

impl NewTradeAudioMapping {
    /// Build a mapping row from a trade and the call it was matched to
    pub fn from_trade(trade: &TradeRecord, tag1: &str, audio_file_name: &str) -> Self {
        Self {
            trade_metadata_id: trade.id,
            order_id: trade.order_id.clone(),
            client_code: trade.client_code.clone(),
            al_number: trade.al_number.clone(),
            reg_number: trade.reg_number.clone(),
            trade_date: trade.trade_date.clone(),
            order_placed_time: trade.order_placed_time.clone(),
            symbol: trade.symbol.clone(),
            scrip_name: trade.scrip_name.clone(),
            strike_price: trade.strike_price,
            trade_quantity: trade.trade_quantity,
            trade_price: trade.trade_price,
            voice_recording_confirmations: tag1.to_string(),
            audio_file_name: audio_file_name.to_string(),
            batch_id: trade.batch_id,
        }
    }
}

fn trade_from_row(row: &sqlx::sqlite::SqliteRow) -> TradeRecord {
    TradeRecord {
        id: row.get("id"),
        order_id: row.get("order_id"),
        client_code: row.get("client_code"),
        al_number: row.get("al_number"),
        reg_number: row.get("reg_number"),
        trade_date: row.get("trade_date"),
        order_placed_time: row.get("order_placed_time"),
        symbol: row.get("symbol"),
        scrip_name: row.get("scrip_name"),
        strike_price: row.get("strike_price"),
        trade_quantity: row.get("trade_quantity"),
        trade_price: row.get("trade_price"),
        batch_id: row.get("batch_id"),
        voice_recording_confirmations: row.get("voice_recording_confirmations"),
        audio_file_name: row.get("audio_file_name"),
        audio_call_ref: row.get("audio_call_ref"),
    }
}

fn mapping_from_row(row: &sqlx::sqlite::SqliteRow) -> TradeAudioMapping {
    TradeAudioMapping {
        id: row.get("id"),
        trade_metadata_id: row.get("trade_metadata_id"),
        order_id: row.get("order_id"),
        client_code: row.get("client_code"),
        al_number: row.get("al_number"),
        reg_number: row.get("reg_number"),
        trade_date: row.get("trade_date"),
        order_placed_time: row.get("order_placed_time"),
        symbol: row.get("symbol"),
        scrip_name: row.get("scrip_name"),
        strike_price: row.get("strike_price"),
        trade_quantity: row.get("trade_quantity"),
        trade_price: row.get("trade_price"),
        is_script: row.get::<i64, _>("is_script") != 0,
        is_price: row.get::<i64, _>("is_price") != 0,
        is_quantity: row.get::<i64, _>("is_quantity") != 0,
        voice_recording_confirmations: row.get("voice_recording_confirmations"),
        audio_file_name: row.get("audio_file_name"),
        batch_id: row.get("batch_id"),
    }
}

/// Insert one trade row (metadata ingestion path), returning its id
pub async fn insert_trade(pool: &SqlitePool, trade: &TradeRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO trade_metadata (
            order_id, client_code, al_number, reg_number, trade_date,
            order_placed_time, symbol, scrip_name, strike_price,
            trade_quantity, trade_price, batch_id, voice_recording_confirmations
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&trade.order_id)
    .bind(&trade.client_code)
    .bind(&trade.al_number)
    .bind(&trade.reg_number)
    .bind(&trade.trade_date)
    .bind(&trade.order_placed_time)
    .bind(&trade.symbol)
    .bind(&trade.scrip_name)
    .bind(trade.strike_price)
    .bind(trade.trade_quantity)
    .bind(trade.trade_price)
    .bind(trade.batch_id)
    .bind(&trade.voice_recording_confirmations)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Load one trade by id
pub async fn load_trade(pool: &SqlitePool, trade_id: i64) -> Result<Option<TradeRecord>> {
    let row = sqlx::query("SELECT * FROM trade_metadata WHERE id = ?")
        .bind(trade_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(trade_from_row))
}

/// Load all trades for a batch
pub async fn load_trades_for_batch(pool: &SqlitePool, batch_id: i64) -> Result<Vec<TradeRecord>> {
    let rows = sqlx::query("SELECT * FROM trade_metadata WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(trade_from_row).collect())
}

/// Load trades still carrying a given confirmation tag
pub async fn load_trades_by_confirmation(
    pool: &SqlitePool,
    batch_id: i64,
    confirmation: &str,
) -> Result<Vec<TradeRecord>> {
    let rows = sqlx::query(
        "SELECT * FROM trade_metadata WHERE batch_id = ? AND voice_recording_confirmations = ?",
    )
    .bind(batch_id)
    .bind(confirmation)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(trade_from_row).collect())
}

/// Write the matching verdict back onto a trade row
pub async fn update_trade_verdict(
    pool: &SqlitePool,
    trade_id: i64,
    confirmation: &str,
    matching_status: &str,
    data_missing: &str,
    audio_file_name: Option<&str>,
    audio_call_ref: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE trade_metadata
        SET voice_recording_confirmations = ?,
            matching_status = ?,
            data_missing = ?,
            audio_file_name = COALESCE(?, audio_file_name),
            audio_call_ref = COALESCE(?, audio_call_ref)
        WHERE id = ?
        "#,
    )
    .bind(confirmation)
    .bind(matching_status)
    .bind(data_missing)
    .bind(audio_file_name)
    .bind(audio_call_ref)
    .bind(trade_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Propagate a verdict to every leg of the same client order
pub async fn update_trade_verdict_for_order(
    pool: &SqlitePool,
    client_code: &str,
    order_id: &str,
    confirmation: &str,
    matching_status: &str,
    data_missing: &str,
    audio_file_name: &str,
    audio_call_ref: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE trade_metadata
        SET voice_recording_confirmations = ?,
            matching_status = ?,
            data_missing = ?,
            audio_file_name = ?,
            audio_call_ref = ?
        WHERE client_code = ? AND order_id = ?
        "#,
    )
    .bind(confirmation)
    .bind(matching_status)
    .bind(data_missing)
    .bind(audio_file_name)
    .bind(audio_call_ref)
    .bind(client_code)
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Bulk-insert mapping rows inside one transaction
pub async fn insert_mappings(pool: &SqlitePool, rows: &[NewTradeAudioMapping]) -> Result<i64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    for mapping in rows {
        sqlx::query(
            r#"
            INSERT INTO trade_audio_mappings (
                trade_metadata_id, order_id, client_code, al_number, reg_number,
                trade_date, order_placed_time, symbol, scrip_name, strike_price,
                trade_quantity, trade_price, voice_recording_confirmations,
                audio_file_name, batch_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mapping.trade_metadata_id)
        .bind(&mapping.order_id)
        .bind(&mapping.client_code)
        .bind(&mapping.al_number)
        .bind(&mapping.reg_number)
        .bind(&mapping.trade_date)
        .bind(&mapping.order_placed_time)
        .bind(&mapping.symbol)
        .bind(&mapping.scrip_name)
        .bind(mapping.strike_price)
        .bind(mapping.trade_quantity)
        .bind(mapping.trade_price)
        .bind(&mapping.voice_recording_confirmations)
        .bind(&mapping.audio_file_name)
        .bind(mapping.batch_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(rows.len() as i64)
}

/// Load all mapping rows for a batch
pub async fn load_mappings_for_batch(
    pool: &SqlitePool,
    batch_id: i64,
) -> Result<Vec<TradeAudioMapping>> {
    let rows = sqlx::query("SELECT * FROM trade_audio_mappings WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(mapping_from_row).collect())
}

/// Count mapping rows for a batch
pub async fn count_mappings(pool: &SqlitePool, batch_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM trade_audio_mappings WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

/// Whether any mapping references the given audio file
pub async fn mapping_exists_for_audio(pool: &SqlitePool, audio_file_name: &str) -> Result<bool> {
    let row = sqlx::query("SELECT id FROM trade_audio_mappings WHERE audio_file_name = ? LIMIT 1")
        .bind(audio_file_name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Reset match flags on a set of mapping rows
pub async fn reset_mapping_flags(pool: &SqlitePool, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!(
        "UPDATE trade_audio_mappings SET is_script = 0, is_price = 0, is_quantity = 0 WHERE id IN ({})",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    query.execute(pool).await?;
    Ok(())
}

/// Flip the given flags to 1 on a set of mapping rows
///
/// `set_script`/`set_price`/`set_quantity` select which columns flip;
/// used by the second pass to group updates and bound round-trips.
pub async fn set_mapping_flags(
    pool: &SqlitePool,
    ids: &[i64],
    set_script: bool,
    set_price: bool,
    set_quantity: bool,
) -> Result<()> {
    if ids.is_empty() || !(set_script || set_price || set_quantity) {
        return Ok(());
    }
    let mut assignments = Vec::new();
    if set_script {
        assignments.push("is_script = 1");
    }
    if set_price {
        assignments.push("is_price = 1");
    }
    if set_quantity {
        assignments.push("is_quantity = 1");
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!(
        "UPDATE trade_audio_mappings SET {} WHERE id IN ({})",
        assignments.join(", "),
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    query.execute(pool).await?;
    Ok(())
}
