//! Pipeline event log
//!
//! Thin facade over the pipeline_events table. An event that fails to
//! persist is logged and dropped; observability must never take the
//! pipeline down with it.

use crate::db;
use callaudit_common::events::PipelineEvent;
use chrono::Utc;
use sqlx::SqlitePool;

/// Best-effort writer for pipeline lifecycle events
#[derive(Clone)]
pub struct EventLog {
    db: SqlitePool,
}

impl EventLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Err(e) = db::events::insert_event(&self.db, &event).await {
            tracing::warn!(error = %e, "Event log write failed");
        }
    }

    pub async fn stage_started(&self, batch_id: i64, stage: &str, total_files: i64) {
        self.emit(PipelineEvent::StageStarted {
            batch_id,
            stage: stage.to_string(),
            total_files,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn stage_progress(
        &self,
        batch_id: i64,
        stage: &str,
        processed_files: i64,
        total_files: i64,
    ) {
        self.emit(PipelineEvent::StageProgress {
            batch_id,
            stage: stage.to_string(),
            processed_files,
            total_files,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn stage_completed(&self, batch_id: i64, stage: &str, succeeded: i64, failed: i64) {
        self.emit(PipelineEvent::StageCompleted {
            batch_id,
            stage: stage.to_string(),
            succeeded,
            failed,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn file_error(
        &self,
        batch_id: i64,
        stage: &str,
        file: &str,
        error: &str,
        endpoint: Option<&str>,
    ) {
        self.emit(PipelineEvent::FileError {
            batch_id,
            stage: stage.to_string(),
            file: file.to_string(),
            error: error.to_string(),
            endpoint: endpoint.map(str::to_string),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn call_status(&self, call_id: i64, status: &str) {
        self.emit(PipelineEvent::CallStatusChanged {
            call_id,
            status: status.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn stage_note(&self, batch_id: i64, stage: &str, message: &str) {
        self.emit(PipelineEvent::StageNote {
            batch_id,
            stage: stage.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }
}
