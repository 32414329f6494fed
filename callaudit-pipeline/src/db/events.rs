//! Pipeline event persistence
//!
//! Backing store for the event log the dashboard reads. Writes are
//! best-effort; see `services::event_log`.

use callaudit_common::events::PipelineEvent;
use callaudit_common::Result;
use sqlx::SqlitePool;

/// Persist one pipeline event
pub async fn insert_event(pool: &SqlitePool, event: &PipelineEvent) -> Result<()> {
    let (batch_id, event_type, file, message) = match event {
        PipelineEvent::StageStarted { batch_id, .. } => (*batch_id, "stage_started", None, None),
        PipelineEvent::StageProgress { batch_id, .. } => (*batch_id, "stage_progress", None, None),
        PipelineEvent::StageCompleted { batch_id, .. } => {
            (*batch_id, "stage_completed", None, None)
        }
        PipelineEvent::FileError {
            batch_id,
            file,
            error,
            ..
        } => (*batch_id, "file_error", Some(file.clone()), Some(error.clone())),
        PipelineEvent::StageNote {
            batch_id, message, ..
        } => (*batch_id, "stage_note", None, Some(message.clone())),
        PipelineEvent::CallStatusChanged { call_id, status, .. } => {
            (*call_id, "call_status", None, Some(status.clone()))
        }
    };

    let payload = serde_json::to_string(event)
        .map_err(|e| callaudit_common::Error::Internal(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO pipeline_events (batch_id, stage, event_type, file, message, payload)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch_id)
    .bind(event.stage())
    .bind(event_type)
    .bind(file)
    .bind(message)
    .bind(payload)
    .execute(pool)
    .await?;
    Ok(())
}
