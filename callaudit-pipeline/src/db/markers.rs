//! Idempotency markers and file distribution
//!
//! A marker row's presence means "this stage already processed this file
//! in this batch"; the dispatcher checks before calling out and writes
//! one after every attempt, success or failure, so re-dispatch is a
//! no-op and a failing file is never retried forever.
//!
//! File distribution rows pin each file to the GPU host it was uploaded
//! to, carrying stage-affinity across denoise/IVR/LID.

use callaudit_common::Result;
use sqlx::{Row, SqlitePool};

/// Per-stage, per-file idempotency marker
#[derive(Debug, Clone)]
pub struct StageMarker {
    pub id: i64,
    pub stage: String,
    pub audio_name: String,
    pub batch_id: i64,
    /// Host that produced the stored result
    pub ip: Option<String>,
    /// LID result fields (unused by denoise/IVR markers)
    pub language: Option<String>,
    pub audio_duration: Option<f64>,
    /// Present when the remote call failed; the failure is still markered
    pub error: Option<String>,
}

/// File -> GPU host assignment with per-stage completion flags
#[derive(Debug, Clone)]
pub struct FileDistribution {
    pub id: i64,
    pub file_name: String,
    pub ip: String,
    pub batch_id: i64,
    pub denoise_done: bool,
    pub ivr_done: bool,
    pub lid_done: bool,
    pub stt_done: bool,
}

fn marker_from_row(row: &sqlx::sqlite::SqliteRow) -> StageMarker {
    StageMarker {
        id: row.get("id"),
        stage: row.get("stage"),
        audio_name: row.get("audio_name"),
        batch_id: row.get("batch_id"),
        ip: row.get("ip"),
        language: row.get("language"),
        audio_duration: row.get("audio_duration"),
        error: row.get("error"),
    }
}

fn distribution_from_row(row: &sqlx::sqlite::SqliteRow) -> FileDistribution {
    FileDistribution {
        id: row.get("id"),
        file_name: row.get("file_name"),
        ip: row.get("ip"),
        batch_id: row.get("batch_id"),
        denoise_done: row.get::<i64, _>("denoise_done") != 0,
        ivr_done: row.get::<i64, _>("ivr_done") != 0,
        lid_done: row.get::<i64, _>("lid_done") != 0,
        stt_done: row.get::<i64, _>("stt_done") != 0,
    }
}

/// Look up an existing marker for a stage + file
pub async fn load_marker(
    pool: &SqlitePool,
    stage: &str,
    audio_name: &str,
    batch_id: i64,
) -> Result<Option<StageMarker>> {
    let row = sqlx::query(
        "SELECT * FROM stage_markers WHERE stage = ? AND audio_name = ? AND batch_id = ?",
    )
    .bind(stage)
    .bind(audio_name)
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(marker_from_row))
}

/// Record a marker; an existing row for the same key is left untouched
pub async fn insert_marker(
    pool: &SqlitePool,
    stage: &str,
    audio_name: &str,
    batch_id: i64,
    ip: Option<&str>,
    language: Option<&str>,
    audio_duration: Option<f64>,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO stage_markers (stage, audio_name, batch_id, ip, language, audio_duration, error)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(stage, audio_name, batch_id) DO NOTHING
        "#,
    )
    .bind(stage)
    .bind(audio_name)
    .bind(batch_id)
    .bind(ip)
    .bind(language)
    .bind(audio_duration)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load all markers for a stage in a batch
pub async fn load_markers_for_stage(
    pool: &SqlitePool,
    stage: &str,
    batch_id: i64,
) -> Result<Vec<StageMarker>> {
    let rows = sqlx::query("SELECT * FROM stage_markers WHERE stage = ? AND batch_id = ?")
        .bind(stage)
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(marker_from_row).collect())
}

/// Record a file's GPU assignment
pub async fn insert_distribution(
    pool: &SqlitePool,
    file_name: &str,
    ip: &str,
    batch_id: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO file_distributions (file_name, ip, batch_id)
        VALUES (?, ?, ?)
        ON CONFLICT(file_name, batch_id) DO NOTHING
        "#,
    )
    .bind(file_name)
    .bind(ip)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load all distributions for a batch
pub async fn load_distributions(pool: &SqlitePool, batch_id: i64) -> Result<Vec<FileDistribution>> {
    let rows = sqlx::query("SELECT * FROM file_distributions WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(distribution_from_row).collect())
}

/// Files whose `<stage>_done` flag is still 0, grouped with their host
pub async fn load_pending_for_stage(
    pool: &SqlitePool,
    batch_id: i64,
    stage_column: &str,
) -> Result<Vec<FileDistribution>> {
    // stage_column comes from the fixed StageSpec table, never user input
    let sql = format!(
        "SELECT * FROM file_distributions WHERE batch_id = ? AND {} = 0",
        stage_column
    );
    let rows = sqlx::query(&sql).bind(batch_id).fetch_all(pool).await?;
    Ok(rows.iter().map(distribution_from_row).collect())
}

/// Flip a stage's done flag for a set of files
pub async fn mark_stage_done(
    pool: &SqlitePool,
    batch_id: i64,
    stage_column: &str,
    file_names: &[String],
) -> Result<()> {
    if file_names.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; file_names.len()].join(",");
    let sql = format!(
        "UPDATE file_distributions SET {} = 1 WHERE batch_id = ? AND file_name IN ({})",
        stage_column, placeholders
    );
    let mut query = sqlx::query(&sql).bind(batch_id);
    for name in file_names {
        query = query.bind(name);
    }
    query.execute(pool).await?;
    Ok(())
}
