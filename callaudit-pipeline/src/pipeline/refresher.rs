//! Periodic batch-status refresher
//!
//! Publishes progress events for the active batch so the external
//! dashboard sees call-level movement between the orchestrator's coarse
//! stage transitions. Read-only apart from the event log.

use crate::db::{batches, calls};
use crate::services::event_log::EventLog;
use crate::types::{CallStatus, StageStatus};
use callaudit_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;

pub struct BatchStatusRefresher {
    db: SqlitePool,
    event_log: EventLog,
    interval: Duration,
}

impl BatchStatusRefresher {
    pub fn new(db: SqlitePool, event_log: EventLog, interval: Duration) -> Self {
        Self {
            db,
            event_log,
            interval,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        tracing::info!(interval_secs = self.interval.as_secs(), "Batch status refresher started");
        loop {
            interval.tick().await;
            if let Err(e) = self.refresh().await {
                tracing::warn!(error = %e, "Batch status refresh failed");
            }
        }
    }

    async fn refresh(&self) -> Result<()> {
        let Some(batch) = batches::load_active_batch(&self.db).await? else {
            return Ok(());
        };
        // Nothing call-level moves before the STT handoff
        if batch.stt == StageStatus::Pending {
            return Ok(());
        }

        let total = batch.total_files.max(1);
        let done = calls::count_calls_in_status(&self.db, batch.id, CallStatus::Complete).await?
            + calls::count_calls_in_status(&self.db, batch.id, CallStatus::ShortCall).await?
            + calls::count_calls_in_status(&self.db, batch.id, CallStatus::UnsupportedLanguage)
                .await?;

        self.event_log
            .stage_progress(batch.id, "audit", done, total)
            .await;
        tracing::debug!(batch_id = batch.id, done, total, "Batch progress");
        Ok(())
    }
}
