//! Batch pipeline orchestrator
//!
//! One long-lived polling loop per process. Every tick re-reads the
//! active batch and advances whichever stage is due: file distribution,
//! metadata ingestion triggers, the GPU stages (denoise / IVR / LID),
//! trade matching, then the STT handoff to the drain loop. Stage
//! transitions serialize the GPU container swaps; the stages are
//! mutually exclusive consumers of the same hardware.
//!
//! Failure policy: a missing source folder or metadata is wait-and-
//! retry, never fatal; any error inside a cycle is logged and the loop
//! continues on the next tick. Idempotency lives in the dispatch/marker
//! layer, so at-least-once cycles are safe.

use crate::config::Settings;
use crate::db::calls::{self, NewCall};
use crate::db::{batches, markers};
use crate::matching::engine as matching_engine;
use crate::pipeline::PipelineFlags;
use crate::services::dispatcher::{StageDispatcher, StageKind, StageSpec};
use crate::services::event_log::EventLog;
use crate::services::lifecycle::{ComputeLifecycle, MediatorClient};
use crate::types::{CallStatus, Stage, StageStatus};
use callaudit_common::time;
use callaudit_common::Result;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const AUDIO_EXTENSIONS: [&str; 4] = ["wav", "mp3", "ogg", "flac"];

/// Top-level batch control loop
pub struct Orchestrator {
    db: SqlitePool,
    settings: Settings,
    lifecycle: Arc<dyn ComputeLifecycle>,
    mediator: Arc<MediatorClient>,
    dispatcher: StageDispatcher,
    event_log: EventLog,
    flags: Arc<PipelineFlags>,
}

impl Orchestrator {
    pub fn new(
        db: SqlitePool,
        settings: Settings,
        lifecycle: Arc<dyn ComputeLifecycle>,
        mediator: Arc<MediatorClient>,
        dispatcher: StageDispatcher,
        event_log: EventLog,
        flags: Arc<PipelineFlags>,
    ) -> Self {
        Self {
            db,
            settings,
            lifecycle,
            mediator,
            dispatcher,
            event_log,
            flags,
        }
    }

    /// Run forever; cycle errors are logged, never fatal
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        tracing::info!(
            interval_secs = self.settings.poll_interval_secs,
            "Orchestrator started"
        );
        loop {
            interval.tick().await;
            if let Err(e) = self.cycle().await {
                tracing::error!(error = %e, "Orchestrator cycle failed");
            }
        }
    }

    async fn cycle(&self) -> Result<()> {
        let batch = match batches::load_active_batch(&self.db).await? {
            Some(batch) => batch,
            None => self.bootstrap_batch().await?,
        };

        if batch.batch_status == "Completed" {
            return self.roll_over(&batch).await;
        }

        if !self.flags.try_begin_request() {
            return Ok(());
        }
        let result = self.advance(&batch).await;
        self.flags.end_request();
        result
    }

    /// Create and activate today's batch when none is active
    async fn bootstrap_batch(&self) -> Result<batches::Batch> {
        let today = Local::now().date_naive();
        self.activate_batch_for_date(today).await
    }

    async fn activate_batch_for_date(&self, date: NaiveDate) -> Result<batches::Batch> {
        let date_str = time::format_call_date(date);
        let batch_id = match batches::load_batch_by_date(&self.db, &date_str).await? {
            Some(batch) => batch.id,
            None => {
                let id = batches::create_batch(&self.db, &date_str).await?;
                tracing::info!(batch_id = id, date = %date_str, "Batch created");
                id
            }
        };
        batches::activate_batch(&self.db, batch_id).await?;
        batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| callaudit_common::Error::NotFound(format!("batch {}", batch_id)))
    }

    /// Advance the earliest incomplete stage of the active batch
    async fn advance(&self, batch: &batches::Batch) -> Result<()> {
        if batch.db_insertion != StageStatus::Complete {
            return self.run_db_insertion(batch).await;
        }
        if !batch.call_metadata_done || !batch.trade_metadata_done {
            return self.trigger_metadata_ingestion(batch).await;
        }

        if self.settings.denoise_enabled && batch.denoise != StageStatus::Complete {
            return self.run_gpu_stage(batch, Stage::Denoise).await;
        }
        if self.settings.ivr_enabled && batch.ivr != StageStatus::Complete {
            return self.run_gpu_stage(batch, Stage::Ivr).await;
        }
        if batch.lid != StageStatus::Complete {
            self.run_gpu_stage(batch, Stage::Lid).await?;
            return self.insert_calls_from_lid(batch.id).await;
        }

        if self.settings.rule_engine_enabled && batch.triaging != StageStatus::Complete {
            return self.run_trade_matching(batch).await;
        }

        self.advance_stt(batch).await
    }

    // ------------------------------------------------------------------
    // dbInsertion: intake folder -> GPU distribution
    // ------------------------------------------------------------------

    fn batch_source_dir(&self, batch: &batches::Batch) -> PathBuf {
        Path::new(&self.settings.intake_dir).join(&batch.batch_date)
    }

    async fn run_db_insertion(&self, batch: &batches::Batch) -> Result<()> {
        let source_dir = self.batch_source_dir(batch);
        if !source_dir.is_dir() {
            // Not fatal: the day's export may simply not have landed yet
            tracing::info!(dir = %source_dir.display(), "Source folder absent, retrying next cycle");
            return Ok(());
        }

        batches::set_stage_status(&self.db, batch.id, Stage::DbInsertion, StageStatus::InProgress)
            .await?;

        // Partial resume: files already distributed mean a prior run got
        // through upload before dying
        let existing = markers::load_distributions(&self.db, batch.id).await?;
        if !existing.is_empty() {
            tracing::info!(batch_id = batch.id, count = existing.len(), "Files already distributed");
            batches::set_stage_status(&self.db, batch.id, Stage::DbInsertion, StageStatus::Complete)
                .await?;
            return Ok(());
        }

        let mut audio_files: Vec<PathBuf> = std::fs::read_dir(&source_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        audio_files.sort();

        self.event_log
            .stage_started(batch.id, "file_distribution", audio_files.len() as i64)
            .await;

        let hosts = self.settings.gpu_host_list();
        if hosts.is_empty() {
            return Err(callaudit_common::Error::Config(
                "no GPU hosts configured".to_string(),
            ));
        }
        let mut uploaded = 0i64;
        let mut failed = 0i64;
        for (index, path) in audio_files.iter().enumerate() {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let host = &hosts[index % hosts.len()];
            match self.mediator.upload_file(host, path, file_name).await {
                Ok(()) => {
                    markers::insert_distribution(&self.db, file_name, host, batch.id).await?;
                    uploaded += 1;
                }
                Err(e) => {
                    tracing::error!(file = %file_name, host = %host, error = %e, "Upload failed");
                    self.event_log
                        .file_error(batch.id, "file_distribution", file_name, &e.to_string(), Some(host.as_str()))
                        .await;
                    failed += 1;
                }
            }
        }

        batches::set_total_files(&self.db, batch.id, audio_files.len() as i64).await?;
        batches::set_stage_status(&self.db, batch.id, Stage::DbInsertion, StageStatus::Complete)
            .await?;
        self.event_log
            .stage_completed(batch.id, "file_distribution", uploaded, failed)
            .await;
        tracing::info!(batch_id = batch.id, uploaded, failed, "Files distributed");
        Ok(())
    }

    /// Trigger the external call/trade metadata ingestion jobs
    ///
    /// Ingestion itself (CSV parsing) is an external collaborator; this
    /// records that both were kicked off and completed so the matching
    /// stage has its prerequisites.
    async fn trigger_metadata_ingestion(&self, batch: &batches::Batch) -> Result<()> {
        let call_rows = crate::db::call_metadata::count_call_metadata(&self.db, batch.id).await?;
        let trade_rows = crate::db::trades::load_trades_for_batch(&self.db, batch.id).await?.len();

        if call_rows == 0 && trade_rows == 0 {
            // Ingestion has not landed anything yet; wait-and-retry
            tracing::info!(batch_id = batch.id, "Metadata not ingested yet, retrying next cycle");
            return Ok(());
        }

        batches::set_metadata_done(&self.db, batch.id, call_rows > 0, trade_rows > 0).await?;
        self.event_log
            .stage_note(
                batch.id,
                "metadata",
                &format!("call metadata rows: {}, trade rows: {}", call_rows, trade_rows),
            )
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // GPU stages
    // ------------------------------------------------------------------

    fn stage_spec(&self, stage: Stage) -> StageSpec {
        match stage {
            Stage::Denoise => StageSpec {
                stage,
                kind: StageKind::Denoise,
                marker_stage: "denoise",
                done_column: "denoise_done",
                container: self.settings.denoise_container.clone(),
                endpoint: self.settings.denoise_endpoint.clone(),
                warmup: Duration::from_secs(self.settings.denoise_wait_secs),
                entity: "DENOISE",
            },
            Stage::Ivr => StageSpec {
                stage,
                kind: StageKind::Ivr,
                marker_stage: "ivr",
                done_column: "ivr_done",
                container: self.settings.ivr_container.clone(),
                endpoint: self.settings.ivr_endpoint.clone(),
                warmup: Duration::from_secs(self.settings.ivr_wait_secs),
                entity: "IVR",
            },
            Stage::Lid => StageSpec {
                stage,
                kind: StageKind::Lid,
                marker_stage: "lid",
                done_column: "lid_done",
                container: self.settings.lid_container.clone(),
                endpoint: self.settings.lid_endpoint.clone(),
                warmup: Duration::from_secs(self.settings.lid_wait_secs),
                entity: "LID",
            },
            _ => unreachable!("not a dispatchable stage: {stage}"),
        }
    }

    /// Container the previous GPU stage left running, if any
    fn previous_container(&self, stage: Stage) -> Option<String> {
        match stage {
            Stage::Denoise => None,
            Stage::Ivr => self
                .settings
                .denoise_enabled
                .then(|| self.settings.denoise_container.clone()),
            Stage::Lid => {
                if self.settings.ivr_enabled {
                    Some(self.settings.ivr_container.clone())
                } else if self.settings.denoise_enabled {
                    Some(self.settings.denoise_container.clone())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    async fn run_gpu_stage(&self, batch: &batches::Batch, stage: Stage) -> Result<()> {
        batches::set_stage_status(&self.db, batch.id, stage, StageStatus::InProgress).await?;

        let spec = self.stage_spec(stage);
        let previous = self.previous_container(stage);
        self.dispatcher
            .run_stage(batch.id, &spec, previous.as_deref())
            .await?;

        batches::set_stage_status(&self.db, batch.id, stage, StageStatus::Complete).await?;
        batches::set_batch_status(&self.db, batch.id, &format!("{}Done", stage)).await?;
        Ok(())
    }

    /// Create call records from the LID markers
    async fn insert_calls_from_lid(&self, batch_id: i64) -> Result<()> {
        let lid_markers = markers::load_markers_for_stage(&self.db, "lid", batch_id).await?;
        let mut created = 0;
        for marker in &lid_markers {
            if marker.error.is_some() {
                continue;
            }
            let new_call = NewCall {
                audio_name: marker.audio_name.clone(),
                language: marker.language.clone(),
                language_id: None,
                audio_duration: marker.audio_duration.unwrap_or(0.0),
                ip: marker.ip.clone(),
                process_id: self.settings.process_id,
                category_mapping_id: self.settings.category_mapping_id,
                batch_id,
                meta_data: None,
            };
            if calls::insert_call(&self.db, &new_call).await?.is_some() {
                created += 1;
            }
        }
        self.event_log
            .stage_note(batch_id, "lid", &format!("created {} call records", created))
            .await;
        tracing::info!(batch_id, created, "Calls created from LID results");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Trade matching (triaging)
    // ------------------------------------------------------------------

    async fn run_trade_matching(&self, batch: &batches::Batch) -> Result<()> {
        if !self.flags.try_begin_matching() {
            return Ok(());
        }
        let result = async {
            batches::set_stage_status(&self.db, batch.id, Stage::Triaging, StageStatus::InProgress)
                .await?;
            self.event_log.stage_started(batch.id, "triaging", 0).await;

            let supported = self.settings.supported_language_list();
            let mappings =
                matching_engine::run_first_pass(&self.db, batch.id, &supported).await?;
            let no_trade =
                matching_engine::fill_audio_not_found(&self.db, batch.id).await?;

            batches::set_stage_status(&self.db, batch.id, Stage::Triaging, StageStatus::Complete)
                .await?;
            batches::set_batch_status(&self.db, batch.id, "triagingDone").await?;
            self.event_log
                .stage_completed(batch.id, "triaging", mappings, 0)
                .await;
            tracing::info!(batch_id = batch.id, mappings, no_trade, "Trade matching step 1 done");
            Ok(())
        }
        .await;
        self.flags.end_matching();
        result
    }

    // ------------------------------------------------------------------
    // STT handoff and completion
    // ------------------------------------------------------------------

    /// Bring the STT services up, then watch the drain loop finish
    async fn advance_stt(&self, batch: &batches::Batch) -> Result<()> {
        match batch.stt {
            StageStatus::Pending => {
                // LID is done with the GPU; swap in STT + VAD
                if let Some(previous) = self.previous_container(Stage::Lid) {
                    let _ = self.lifecycle.stop(&previous).await;
                }
                let _ = self.lifecycle.stop(&self.settings.lid_container).await;
                self.lifecycle
                    .start(&self.settings.stt_container)
                    .await
                    .map_err(|e| callaudit_common::Error::Internal(e.to_string()))?;
                self.lifecycle
                    .start(&self.settings.vad_container)
                    .await
                    .map_err(|e| callaudit_common::Error::Internal(e.to_string()))?;
                self.lifecycle
                    .wait_until_ready(
                        &self.settings.stt_container,
                        Duration::from_secs(self.settings.stt_wait_secs),
                    )
                    .await
                    .map_err(|e| callaudit_common::Error::Internal(e.to_string()))?;

                batches::set_stage_status(&self.db, batch.id, Stage::Stt, StageStatus::InProgress)
                    .await?;
                batches::set_stage_status(&self.db, batch.id, Stage::Audit, StageStatus::InProgress)
                    .await?;
                batches::set_batch_status(&self.db, batch.id, "sttInProgress").await?;
                tracing::info!(batch_id = batch.id, "STT services up, drain loop may proceed");
            }
            StageStatus::InProgress => {
                let pending =
                    calls::count_calls_in_status(&self.db, batch.id, CallStatus::Pending).await?
                        + calls::count_calls_in_status(
                            &self.db,
                            batch.id,
                            CallStatus::Transcription,
                        )
                        .await?;
                if pending == 0 {
                    batches::set_stage_status(&self.db, batch.id, Stage::Stt, StageStatus::Complete)
                        .await?;
                    batches::set_batch_status(&self.db, batch.id, "sttDone").await?;
                }
            }
            StageStatus::Complete => {
                if batch.audit != StageStatus::Complete {
                    let unfinished = calls::count_unfinished_calls(&self.db, batch.id).await?;
                    if unfinished == 0 {
                        batches::set_stage_status(
                            &self.db,
                            batch.id,
                            Stage::Audit,
                            StageStatus::Complete,
                        )
                        .await?;
                        batches::set_batch_status(&self.db, batch.id, "Completed").await?;
                        tracing::info!(batch_id = batch.id, "Batch completed");
                    }
                } else {
                    batches::set_batch_status(&self.db, batch.id, "Completed").await?;
                }
            }
        }
        Ok(())
    }

    /// Roll the pipeline over to the next calendar day
    ///
    /// Clears the active flag, creates/activates the next day's batch,
    /// and restarts the steady-state inference services so the pipeline
    /// is warm without operator intervention.
    async fn roll_over(&self, batch: &batches::Batch) -> Result<()> {
        tracing::info!(batch_id = batch.id, date = %batch.batch_date, "Rolling over to next day");
        batches::deactivate_batch(&self.db, batch.id).await?;

        let next_date = time::parse_call_date(&batch.batch_date)
            .map(|d| d + ChronoDuration::days(1))
            .unwrap_or_else(|| Local::now().date_naive());
        let next = self.activate_batch_for_date(next_date).await?;

        let _ = self.lifecycle.stop(&self.settings.stt_container).await;
        let _ = self.lifecycle.stop(&self.settings.vad_container).await;
        if let Err(e) = self.lifecycle.start(&self.settings.stt_container).await {
            tracing::warn!(error = %e, "STT restart failed during rollover");
        }
        if let Err(e) = self.lifecycle.start(&self.settings.vad_container).await {
            tracing::warn!(error = %e, "VAD restart failed during rollover");
        }

        tracing::info!(batch_id = next.id, date = %next.batch_date, "Next batch active");
        Ok(())
    }
}
