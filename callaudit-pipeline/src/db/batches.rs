//! Batch persistence
//!
//! One row per intake day. Exactly one batch carries the active flag;
//! stage statuses only ever advance Pending -> InProgress -> Complete,
//! enforced here so callers cannot regress a stage by accident.

use crate::types::{Stage, StageStatus};
use callaudit_common::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

/// One intake day's batch with its stage ledger
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: i64,
    /// dd-mm-YYYY
    pub batch_date: String,
    pub current_batch: bool,
    pub batch_status: String,
    pub total_files: i64,
    pub db_insertion: StageStatus,
    pub denoise: StageStatus,
    pub ivr: StageStatus,
    pub lid: StageStatus,
    pub stt: StageStatus,
    pub audit: StageStatus,
    pub triaging: StageStatus,
    pub call_metadata_done: bool,
    pub trade_metadata_done: bool,
}

impl Batch {
    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::DbInsertion => self.db_insertion,
            Stage::Denoise => self.denoise,
            Stage::Ivr => self.ivr,
            Stage::Lid => self.lid,
            Stage::Stt => self.stt,
            Stage::Audit => self.audit,
            Stage::Triaging => self.triaging,
        }
    }
}

fn parse_status(raw: &str) -> StageStatus {
    StageStatus::parse(raw).unwrap_or(StageStatus::Pending)
}

fn batch_from_row(row: &sqlx::sqlite::SqliteRow) -> Batch {
    Batch {
        id: row.get("id"),
        batch_date: row.get("batch_date"),
        current_batch: row.get::<i64, _>("current_batch") != 0,
        batch_status: row.get("batch_status"),
        total_files: row.get("total_files"),
        db_insertion: parse_status(&row.get::<String, _>("db_insertion_status")),
        denoise: parse_status(&row.get::<String, _>("denoise_status")),
        ivr: parse_status(&row.get::<String, _>("ivr_status")),
        lid: parse_status(&row.get::<String, _>("lid_status")),
        stt: parse_status(&row.get::<String, _>("stt_status")),
        audit: parse_status(&row.get::<String, _>("audit_status")),
        triaging: parse_status(&row.get::<String, _>("triaging_status")),
        call_metadata_done: row.get::<i64, _>("call_metadata_done") != 0,
        trade_metadata_done: row.get::<i64, _>("trade_metadata_done") != 0,
    }
}

/// Create a batch for a date and return its id
pub async fn create_batch(pool: &SqlitePool, batch_date: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO batches (batch_date) VALUES (?)")
        .bind(batch_date)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Load the batch carrying the active flag, if any
pub async fn load_active_batch(pool: &SqlitePool) -> Result<Option<Batch>> {
    let row = sqlx::query("SELECT * FROM batches WHERE current_batch = 1 LIMIT 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(batch_from_row))
}

/// Load a batch by date
pub async fn load_batch_by_date(pool: &SqlitePool, batch_date: &str) -> Result<Option<Batch>> {
    let row = sqlx::query("SELECT * FROM batches WHERE batch_date = ?")
        .bind(batch_date)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(batch_from_row))
}

/// Load a batch by id
pub async fn load_batch(pool: &SqlitePool, batch_id: i64) -> Result<Option<Batch>> {
    let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(batch_from_row))
}

/// Mark a batch as the single active one
///
/// Clears the flag everywhere first so the at-most-one invariant holds
/// even if a previous rollover was interrupted mid-way.
pub async fn activate_batch(pool: &SqlitePool, batch_id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE batches SET current_batch = 0 WHERE current_batch = 1")
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE batches SET current_batch = 1 WHERE id = ?")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Clear the active flag on a batch
pub async fn deactivate_batch(pool: &SqlitePool, batch_id: i64) -> Result<()> {
    sqlx::query("UPDATE batches SET current_batch = 0 WHERE id = ?")
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Advance a stage status, recording start/end timestamps
///
/// Rejects backward transitions; writing the current status again is a
/// no-op rather than an error so re-runs stay idempotent.
pub async fn set_stage_status(
    pool: &SqlitePool,
    batch_id: i64,
    stage: Stage,
    status: StageStatus,
) -> Result<()> {
    let batch = load_batch(pool, batch_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;

    let current = batch.stage_status(stage);
    if status.rank() < current.rank() {
        return Err(Error::InvalidInput(format!(
            "stage {} cannot move {} -> {}",
            stage, current, status
        )));
    }
    if status == current {
        return Ok(());
    }

    let prefix = stage.column_prefix();
    let now = Utc::now().to_rfc3339();
    let sql = match status {
        StageStatus::InProgress => format!(
            "UPDATE batches SET {p}_status = ?, {p}_start_time = ? WHERE id = ?",
            p = prefix
        ),
        _ => format!(
            "UPDATE batches SET {p}_status = ?, {p}_end_time = ? WHERE id = ?",
            p = prefix
        ),
    };

    sqlx::query(&sql)
        .bind(status.as_str())
        .bind(&now)
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update the overall batch status string
pub async fn set_batch_status(pool: &SqlitePool, batch_id: i64, status: &str) -> Result<()> {
    sqlx::query("UPDATE batches SET batch_status = ? WHERE id = ?")
        .bind(status)
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the batch's total intake file count
pub async fn set_total_files(pool: &SqlitePool, batch_id: i64, total: i64) -> Result<()> {
    sqlx::query("UPDATE batches SET total_files = ? WHERE id = ?")
        .bind(total)
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record completion of the call/trade metadata ingestion triggers
pub async fn set_metadata_done(
    pool: &SqlitePool,
    batch_id: i64,
    call_metadata: bool,
    trade_metadata: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE batches SET call_metadata_done = ?, trade_metadata_done = ? WHERE id = ?",
    )
    .bind(call_metadata as i64)
    .bind(trade_metadata as i64)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}
