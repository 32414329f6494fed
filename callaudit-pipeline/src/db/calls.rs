//! Call record persistence
//!
//! One row per audio file within a batch. The drain loop owns a call
//! exclusively from the moment it claims it; claiming is a single atomic
//! status flip so cooperating instances never double-process a row.

use crate::types::CallStatus;
use callaudit_common::Result;
use sqlx::{Row, SqlitePool};

/// One recorded call within a batch
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub id: i64,
    pub audio_name: String,
    pub status: CallStatus,
    pub language: Option<String>,
    pub language_id: Option<i64>,
    pub audio_duration: f64,
    pub ip: Option<String>,
    pub process_id: i64,
    pub category_mapping_id: i64,
    pub batch_id: i64,
    pub meta_data: Option<serde_json::Value>,
}

/// Fields for a new call row
#[derive(Debug, Clone)]
pub struct NewCall {
    pub audio_name: String,
    pub language: Option<String>,
    pub language_id: Option<i64>,
    pub audio_duration: f64,
    pub ip: Option<String>,
    pub process_id: i64,
    pub category_mapping_id: i64,
    pub batch_id: i64,
    pub meta_data: Option<serde_json::Value>,
}

fn call_from_row(row: &sqlx::sqlite::SqliteRow) -> CallRecord {
    let meta_data = row
        .get::<Option<String>, _>("meta_data")
        .and_then(|raw| serde_json::from_str(&raw).ok());
    CallRecord {
        id: row.get("id"),
        audio_name: row.get("audio_name"),
        status: CallStatus::parse(&row.get::<String, _>("status")).unwrap_or(CallStatus::Pending),
        language: row.get("language"),
        language_id: row.get("language_id"),
        audio_duration: row.get("audio_duration"),
        ip: row.get("ip"),
        process_id: row.get("process_id"),
        category_mapping_id: row.get("category_mapping_id"),
        batch_id: row.get("batch_id"),
        meta_data,
    }
}

/// Insert a call row; skips silently if the file already has one
pub async fn insert_call(pool: &SqlitePool, call: &NewCall) -> Result<Option<i64>> {
    let meta = call
        .meta_data
        .as_ref()
        .map(|v| v.to_string());
    let result = sqlx::query(
        r#"
        INSERT INTO calls (
            audio_name, status, language, language_id, audio_duration,
            ip, process_id, category_mapping_id, batch_id, meta_data
        )
        VALUES (?, 'Pending', ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(audio_name, batch_id) DO NOTHING
        "#,
    )
    .bind(&call.audio_name)
    .bind(&call.language)
    .bind(call.language_id)
    .bind(call.audio_duration)
    .bind(&call.ip)
    .bind(call.process_id)
    .bind(call.category_mapping_id)
    .bind(call.batch_id)
    .bind(meta)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(result.last_insert_rowid()))
    }
}

/// Load a call by audio file name within a batch
pub async fn load_call_by_audio_name(
    pool: &SqlitePool,
    audio_name: &str,
    batch_id: i64,
) -> Result<Option<CallRecord>> {
    let row = sqlx::query("SELECT * FROM calls WHERE audio_name = ? AND batch_id = ?")
        .bind(audio_name)
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(call_from_row))
}

/// Claim the next call in `from` status, flipping it to `to`
///
/// Single-statement claim: the UPDATE both selects and transitions the
/// row, so two drain instances can never claim the same call. Returns
/// the claimed record, already in `to` status.
pub async fn claim_next_call(
    pool: &SqlitePool,
    batch_id: i64,
    from: CallStatus,
    to: CallStatus,
) -> Result<Option<CallRecord>> {
    let row = sqlx::query(
        r#"
        UPDATE calls
        SET status = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = (
            SELECT id FROM calls
            WHERE status = ? AND batch_id = ?
            ORDER BY id
            LIMIT 1
        )
        RETURNING *
        "#,
    )
    .bind(to.as_str())
    .bind(from.as_str())
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(call_from_row))
}

/// Update a call's status
pub async fn set_call_status(pool: &SqlitePool, call_id: i64, status: CallStatus) -> Result<()> {
    sqlx::query("UPDATE calls SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(status.as_str())
        .bind(call_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update language fields and duration after LID
pub async fn set_call_language(
    pool: &SqlitePool,
    audio_name: &str,
    batch_id: i64,
    language: &str,
    language_id: Option<i64>,
    audio_duration: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE calls
        SET language = ?, language_id = ?, audio_duration = ?, updated_at = CURRENT_TIMESTAMP
        WHERE audio_name = ? AND batch_id = ?
        "#,
    )
    .bind(language)
    .bind(language_id)
    .bind(audio_duration)
    .bind(audio_name)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Count calls in a given status for a batch
pub async fn count_calls_in_status(
    pool: &SqlitePool,
    batch_id: i64,
    status: CallStatus,
) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM calls WHERE batch_id = ? AND status = ?")
        .bind(batch_id)
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

/// Count calls in a batch that are not yet terminal or audit-complete
pub async fn count_unfinished_calls(pool: &SqlitePool, batch_id: i64) -> Result<i64> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n FROM calls
        WHERE batch_id = ?
          AND status NOT IN ('Complete', 'ShortCall', 'UnsupportedLanguage')
        "#,
    )
    .bind(batch_id)
    .fetch_one(pool)
    .await?;
    Ok(row.get("n"))
}

/// Load all calls for a batch (matching-engine snapshot input)
pub async fn load_calls_for_batch(pool: &SqlitePool, batch_id: i64) -> Result<Vec<CallRecord>> {
    let rows = sqlx::query("SELECT * FROM calls WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(call_from_row).collect())
}
