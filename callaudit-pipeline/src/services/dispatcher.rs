//! Stage dispatcher for the per-file GPU stages (denoise / IVR / LID)
//!
//! Fans a batch's pending files out to the inference endpoint on the
//! GPU host each file was uploaded to (affinity carries over from the
//! distribution step), with a bounded worker pool. Dispatch is
//! idempotent: a present marker row short-circuits the remote call, and
//! every attempt, success or failure, writes a marker so a single
//! file can neither abort the batch nor be retried forever.

use crate::db::markers::{self, FileDistribution};
use crate::services::event_log::EventLog;
use crate::services::inference::{FileStageRequest, InferenceClient, InferenceError, LidResponse};
use crate::services::lifecycle::ComputeLifecycle;
use crate::types::Stage;
use callaudit_common::Result;
use futures::future::join_all;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Which response shape a stage produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Denoise,
    Ivr,
    Lid,
}

/// Fixed description of one dispatchable stage
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub stage: Stage,
    pub kind: StageKind,
    /// Marker-table key and event-log stage name
    pub marker_stage: &'static str,
    /// Done-flag column in file_distributions
    pub done_column: &'static str,
    pub container: String,
    pub endpoint: String,
    pub warmup: Duration,
    /// Entity label the mediator expects in the payload
    pub entity: &'static str,
}

/// Result of one dispatch run
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Marker hits that skipped the remote call
    pub reused: Vec<String>,
}

enum FileOutcome {
    Succeeded,
    Reused,
    Failed,
}

/// Dispatcher over the batch's file distribution
pub struct StageDispatcher {
    db: SqlitePool,
    lifecycle: Arc<dyn ComputeLifecycle>,
    inference: InferenceClient,
    event_log: EventLog,
    concurrency: usize,
}

impl StageDispatcher {
    pub fn new(
        db: SqlitePool,
        lifecycle: Arc<dyn ComputeLifecycle>,
        inference: InferenceClient,
        event_log: EventLog,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            lifecycle,
            inference,
            event_log,
            concurrency: concurrency.max(1),
        }
    }

    /// Run a full stage: container swap, warm-up, fan-out, bookkeeping
    pub async fn run_stage(
        &self,
        batch_id: i64,
        spec: &StageSpec,
        previous_container: Option<&str>,
    ) -> Result<DispatchSummary> {
        let pending = markers::load_pending_for_stage(&self.db, batch_id, spec.done_column).await?;
        if pending.is_empty() {
            tracing::info!(stage = %spec.stage, batch_id, "No pending files");
            return Ok(DispatchSummary::default());
        }

        tracing::info!(stage = %spec.stage, batch_id, count = pending.len(), "Stage starting");
        self.event_log
            .stage_started(batch_id, spec.marker_stage, pending.len() as i64)
            .await;

        // GPU is exclusive: previous occupant out before the next goes in
        if let Some(previous) = previous_container {
            if let Err(e) = self.lifecycle.stop(previous).await {
                tracing::warn!(container = %previous, error = %e, "Stopping previous container failed");
            }
        }
        self.lifecycle
            .start(&spec.container)
            .await
            .map_err(|e| callaudit_common::Error::Internal(e.to_string()))?;
        self.lifecycle
            .wait_until_ready(&spec.container, spec.warmup)
            .await
            .map_err(|e| callaudit_common::Error::Internal(e.to_string()))?;

        let summary = self.dispatch_files(batch_id, spec, &pending).await?;

        markers::mark_stage_done(&self.db, batch_id, spec.done_column, &summary.succeeded).await?;
        markers::mark_stage_done(&self.db, batch_id, spec.done_column, &summary.reused).await?;

        self.event_log
            .stage_completed(
                batch_id,
                spec.marker_stage,
                (summary.succeeded.len() + summary.reused.len()) as i64,
                summary.failed.len() as i64,
            )
            .await;
        tracing::info!(
            stage = %spec.stage,
            batch_id,
            succeeded = summary.succeeded.len(),
            reused = summary.reused.len(),
            failed = summary.failed.len(),
            "Stage completed"
        );
        Ok(summary)
    }

    /// Fan files out to their endpoints with the bounded pool
    ///
    /// Exposed separately from `run_stage` so the idempotency path can be
    /// exercised without a container runtime behind it.
    pub async fn dispatch_files(
        &self,
        batch_id: i64,
        spec: &StageSpec,
        files: &[FileDistribution],
    ) -> Result<DispatchSummary> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency));

        let tasks = files.iter().map(|dist| {
            let semaphore = semaphore.clone();
            let db = self.db.clone();
            let inference = self.inference.clone();
            let event_log = self.event_log.clone();
            let spec = spec.clone();
            let file_name = dist.file_name.clone();
            let ip = dist.ip.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (file_name, FileOutcome::Failed),
                };
                let outcome =
                    process_one_file(&db, &inference, &event_log, batch_id, &spec, &file_name, &ip)
                        .await;
                (file_name, outcome)
            }
        });

        let mut summary = DispatchSummary::default();
        for (file_name, outcome) in join_all(tasks).await {
            match outcome {
                FileOutcome::Succeeded => summary.succeeded.push(file_name),
                FileOutcome::Reused => summary.reused.push(file_name),
                FileOutcome::Failed => summary.failed.push(file_name),
            }
        }
        Ok(summary)
    }
}

async fn process_one_file(
    db: &SqlitePool,
    inference: &InferenceClient,
    event_log: &EventLog,
    batch_id: i64,
    spec: &StageSpec,
    file_name: &str,
    ip: &str,
) -> FileOutcome {
    // Idempotency short-circuit: present row means already processed
    match markers::load_marker(db, spec.marker_stage, file_name, batch_id).await {
        Ok(Some(_)) => {
            tracing::debug!(stage = %spec.marker_stage, file = %file_name, "Marker hit, reusing result");
            return FileOutcome::Reused;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(stage = %spec.marker_stage, file = %file_name, error = %e, "Marker lookup failed");
            return FileOutcome::Failed;
        }
    }

    let payload = FileStageRequest::new(file_name, spec.entity);
    let call_result: std::result::Result<(Option<String>, Option<f64>), InferenceError> =
        match spec.kind {
            StageKind::Lid => inference
                .post::<_, LidResponse>(ip, &spec.endpoint, &payload)
                .await
                .map(|r| (Some(r.language()), Some(r.audio_duration()))),
            StageKind::Denoise | StageKind::Ivr => inference
                .post::<_, serde_json::Value>(ip, &spec.endpoint, &payload)
                .await
                .map(|_| (None, None)),
        };

    match call_result {
        Ok((language, duration)) => {
            if let Err(e) = markers::insert_marker(
                db,
                spec.marker_stage,
                file_name,
                batch_id,
                Some(ip),
                language.as_deref(),
                duration,
                None,
            )
            .await
            {
                tracing::error!(stage = %spec.marker_stage, file = %file_name, error = %e, "Marker write failed");
                return FileOutcome::Failed;
            }
            FileOutcome::Succeeded
        }
        Err(e) => {
            // Failure is markered too; the file won't be retried forever
            let error_text = e.to_string();
            tracing::error!(stage = %spec.marker_stage, file = %file_name, ip = %ip, error = %error_text, "File dispatch failed");
            event_log
                .file_error(batch_id, spec.marker_stage, file_name, &error_text, Some(ip))
                .await;
            if let Err(marker_err) = markers::insert_marker(
                db,
                spec.marker_stage,
                file_name,
                batch_id,
                Some(ip),
                None,
                None,
                Some(error_text.as_str()),
            )
            .await
            {
                tracing::error!(file = %file_name, error = %marker_err, "Failure marker write failed");
            }
            FileOutcome::Failed
        }
    }
}
