//! Audit answers, timings and transcript persistence

use callaudit_common::Result;
use sqlx::{Row, SqlitePool};

/// One answered audit question for a call
#[derive(Debug, Clone)]
pub struct AuditAnswer {
    pub id: i64,
    pub process_id: i64,
    pub call_id: i64,
    pub section_id: i64,
    pub sub_section_id: i64,
    pub question_id: i64,
    pub answer: String,
    pub scored: i64,
    pub score: i64,
}

/// One transcript segment for a call
#[derive(Debug, Clone)]
pub struct TranscriptSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub speaker: String,
    pub text: String,
    pub confidence: Option<f64>,
}

/// Insert an audit answer, returning its id
pub async fn insert_audit_answer(
    pool: &SqlitePool,
    process_id: i64,
    call_id: i64,
    section_id: i64,
    sub_section_id: i64,
    question_id: i64,
    answer: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_answers
            (process_id, call_id, section_id, sub_section_id, question_id, answer, scored, score)
        VALUES (?, ?, ?, ?, ?, ?, 0, 0)
        "#,
    )
    .bind(process_id)
    .bind(call_id)
    .bind(section_id)
    .bind(sub_section_id)
    .bind(question_id)
    .bind(answer)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Insert an answer unless the question is already answered for the call
pub async fn insert_or_update_audit_answer(
    pool: &SqlitePool,
    process_id: i64,
    call_id: i64,
    section_id: i64,
    sub_section_id: i64,
    question_id: i64,
    answer: &str,
) -> Result<i64> {
    let existing = sqlx::query(
        "SELECT id FROM audit_answers WHERE call_id = ? AND section_id = ? AND question_id = ?",
    )
    .bind(call_id)
    .bind(section_id)
    .bind(question_id)
    .fetch_optional(pool)
    .await?;

    match existing {
        Some(row) => {
            let id: i64 = row.get("id");
            sqlx::query("UPDATE audit_answers SET answer = ? WHERE id = ?")
                .bind(answer)
                .bind(id)
                .execute(pool)
                .await?;
            Ok(id)
        }
        None => {
            insert_audit_answer(
                pool,
                process_id,
                call_id,
                section_id,
                sub_section_id,
                question_id,
                answer,
            )
            .await
        }
    }
}

/// Remove a previously written answer (the matching engine rewrites Q1)
pub async fn delete_audit_answer(
    pool: &SqlitePool,
    call_id: i64,
    section_id: i64,
    question_id: i64,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM audit_answers WHERE call_id = ? AND section_id = ? AND question_id = ?",
    )
    .bind(call_id)
    .bind(section_id)
    .bind(question_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Attach a timing/evidence row to an answer
pub async fn insert_audit_timing(
    pool: &SqlitePool,
    audit_answer_id: i64,
    start_time: f64,
    end_time: f64,
    speaker: &str,
    text: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_timings (start_time, end_time, speaker, text, audit_answer_id)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(start_time)
    .bind(end_time)
    .bind(speaker)
    .bind(text)
    .bind(audit_answer_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist transcript segments for a call in one transaction
pub async fn insert_transcript_segments(
    pool: &SqlitePool,
    call_id: i64,
    segments: &[TranscriptSegment],
) -> Result<()> {
    if segments.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    for segment in segments {
        sqlx::query(
            r#"
            INSERT INTO transcript_segments
                (call_id, start_time, end_time, speaker, text, confidence)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(call_id)
        .bind(segment.start_time)
        .bind(segment.end_time)
        .bind(&segment.speaker)
        .bind(&segment.text)
        .bind(segment.confidence)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Count transcript segments for a call
pub async fn count_transcript_segments(pool: &SqlitePool, call_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM transcript_segments WHERE call_id = ?")
        .bind(call_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}
