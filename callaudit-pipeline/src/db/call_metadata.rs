//! Call metadata persistence
//!
//! Raw telephony records ingested from the daily CSV export. Immutable
//! once loaded; read by the matching engine to place trades inside call
//! time windows.

use callaudit_common::Result;
use sqlx::{Row, SqlitePool};

/// One telephony metadata row
#[derive(Debug, Clone)]
pub struct CallMetadataRecord {
    pub id: i64,
    pub recording_file_name: String,
    pub client_mobile_number: Option<String>,
    pub client_id: Option<String>,
    /// dd-mm-YYYY
    pub call_start_date: Option<String>,
    /// HH:MM:SS
    pub call_start_time: Option<String>,
    pub call_end_date: Option<String>,
    pub call_end_time: Option<String>,
    pub batch_id: i64,
}

impl CallMetadataRecord {
    /// True when both window edges are present and parseable
    pub fn has_window(&self) -> bool {
        matches!(
            (&self.call_start_time, &self.call_end_time),
            (Some(s), Some(e)) if !s.is_empty() && !e.is_empty()
        )
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> CallMetadataRecord {
    CallMetadataRecord {
        id: row.get("id"),
        recording_file_name: row.get("recording_file_name"),
        client_mobile_number: row.get("client_mobile_number"),
        client_id: row.get("client_id"),
        call_start_date: row.get("call_start_date"),
        call_start_time: row.get("call_start_time"),
        call_end_date: row.get("call_end_date"),
        call_end_time: row.get("call_end_time"),
        batch_id: row.get("batch_id"),
    }
}

/// Insert one metadata row
pub async fn insert_call_metadata(
    pool: &SqlitePool,
    record: &CallMetadataRecord,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO call_metadata (
            recording_file_name, client_mobile_number, client_id,
            call_start_date, call_start_time, call_end_date, call_end_time,
            batch_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.recording_file_name)
    .bind(&record.client_mobile_number)
    .bind(&record.client_id)
    .bind(&record.call_start_date)
    .bind(&record.call_start_time)
    .bind(&record.call_end_date)
    .bind(&record.call_end_time)
    .bind(record.batch_id)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Load all metadata rows for a batch
pub async fn load_call_metadata_for_batch(
    pool: &SqlitePool,
    batch_id: i64,
) -> Result<Vec<CallMetadataRecord>> {
    let rows = sqlx::query("SELECT * FROM call_metadata WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(record_from_row).collect())
}

/// Count metadata rows for a batch
pub async fn count_call_metadata(pool: &SqlitePool, batch_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM call_metadata WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}
