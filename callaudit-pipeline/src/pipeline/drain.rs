//! Call drain loop
//!
//! Claims one call at a time per instance and drives it through the
//! transcription and audit sub-stages. Claiming is an atomic status
//! flip, so any number of cooperating instances can run against the
//! same store without double-processing. Every transition fires a
//! webhook toward the auditing UI; webhook failures are logged, never
//! retried.

use crate::config::Settings;
use crate::db::audit::{self, TranscriptSegment};
use crate::db::calls::{self, CallRecord};
use crate::db::conversations::{self, ConversationRecord};
use crate::db::batches;
use crate::matching::second_pass;
use crate::pipeline::PipelineFlags;
use crate::services::inference::{
    ExtractionRequest, ExtractionResponse, InferenceClient, InferenceError, LlmRequest,
    LlmResponse, SttRequest, SttResponse,
};
use crate::services::lifecycle::ComputeLifecycle;
use crate::services::webhook::WebhookClient;
use crate::types::{CallStatus, StageStatus};
use callaudit_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Additional transcription attempts after the first failure
const STT_RETRY_ATTEMPTS: usize = 2;

/// Maximum duration of a call considered too short to audit
const SHORT_CALL_SECS: f64 = 5.0;

/// Per-instance drain loop over the active batch's calls
pub struct CallDrainLoop {
    db: SqlitePool,
    settings: Settings,
    lifecycle: Arc<dyn ComputeLifecycle>,
    inference: InferenceClient,
    webhook: WebhookClient,
    flags: Arc<PipelineFlags>,
}

impl CallDrainLoop {
    pub fn new(
        db: SqlitePool,
        settings: Settings,
        lifecycle: Arc<dyn ComputeLifecycle>,
        inference: InferenceClient,
        webhook: WebhookClient,
        flags: Arc<PipelineFlags>,
    ) -> Self {
        Self {
            db,
            settings,
            lifecycle,
            inference,
            webhook,
            flags,
        }
    }

    /// Run forever; a failed cycle is logged and the next tick continues
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.settings.drain_interval());
        tracing::info!(
            interval_secs = self.settings.drain_interval_secs,
            "Call drain loop started"
        );
        loop {
            interval.tick().await;
            if let Err(e) = self.cycle().await {
                tracing::error!(error = %e, "Drain cycle failed");
            }
        }
    }

    async fn cycle(&self) -> Result<()> {
        let Some(batch) = batches::load_active_batch(&self.db).await? else {
            return Ok(());
        };
        // Calls only become workable once the orchestrator has brought
        // the STT services up
        if batch.stt == StageStatus::Pending {
            return Ok(());
        }

        if !self.flags.try_begin_audit() {
            return Ok(());
        }
        let result = self.process_one(batch.id).await;
        self.flags.end_audit();
        result
    }

    /// Advance at most one call, furthest-along first
    async fn process_one(&self, batch_id: i64) -> Result<()> {
        if let Some(call) =
            calls::claim_next_call(&self.db, batch_id, CallStatus::AuditDone, CallStatus::Complete)
                .await?
        {
            self.webhook
                .notify_call_status(call.id, CallStatus::Complete)
                .await;
            return Ok(());
        }

        if let Some(call) = calls::claim_next_call(
            &self.db,
            batch_id,
            CallStatus::TranscriptDone,
            CallStatus::Auditing,
        )
        .await?
        {
            self.webhook
                .notify_call_status(call.id, CallStatus::Auditing)
                .await;
            return self.audit_call(call).await;
        }

        if let Some(call) = calls::claim_next_call(
            &self.db,
            batch_id,
            CallStatus::Pending,
            CallStatus::Transcription,
        )
        .await?
        {
            self.webhook
                .notify_call_status(call.id, CallStatus::Transcription)
                .await;
            return self.transcribe_call(call).await;
        }

        Ok(())
    }

    async fn transcribe_call(&self, call: CallRecord) -> Result<()> {
        // Domain-terminal exits: no retry, resources released
        if call.audio_duration <= SHORT_CALL_SECS {
            calls::set_call_status(&self.db, call.id, CallStatus::ShortCall).await?;
            self.webhook
                .notify_call_status(call.id, CallStatus::ShortCall)
                .await;
            tracing::info!(call_id = call.id, duration = call.audio_duration, "Short call");
            return Ok(());
        }

        let language = call.language.clone().unwrap_or_default();
        let supported = self.settings.supported_language_list();
        if !supported.iter().any(|s| *s == language) {
            calls::set_call_status(&self.db, call.id, CallStatus::UnsupportedLanguage).await?;
            self.webhook
                .notify_call_status(call.id, CallStatus::UnsupportedLanguage)
                .await;
            tracing::info!(call_id = call.id, language = %language, "Unsupported language");
            return Ok(());
        }

        let host = call
            .ip
            .clone()
            .or_else(|| self.settings.gpu_host_list().first().cloned())
            .unwrap_or_else(|| "localhost".to_string());
        let request = SttRequest::new(&call.audio_name, &language, false);

        match self.transcribe_with_retry(&host, &request).await {
            Ok(response) => {
                let segments: Vec<TranscriptSegment> = response
                    .chunks
                    .iter()
                    .map(|chunk| TranscriptSegment {
                        start_time: chunk.start_time,
                        end_time: chunk.end_time,
                        speaker: chunk.speaker.clone(),
                        text: chunk.text.clone(),
                        confidence: chunk.confidence,
                    })
                    .collect();
                audit::insert_transcript_segments(&self.db, call.id, &segments).await?;
                calls::set_call_status(&self.db, call.id, CallStatus::TranscriptDone).await?;
                self.webhook
                    .notify_call_status_with_duration(
                        call.id,
                        CallStatus::TranscriptDone,
                        response.audio_file_duration,
                    )
                    .await;
                tracing::info!(call_id = call.id, segments = segments.len(), "Transcription done");
            }
            Err(e) => {
                // Give the call back; the next cycle will retry it
                tracing::error!(call_id = call.id, error = %e, "Transcription failed, reverting to Pending");
                calls::set_call_status(&self.db, call.id, CallStatus::Pending).await?;
                self.webhook
                    .notify_call_status(call.id, CallStatus::Pending)
                    .await;
            }
        }
        Ok(())
    }

    /// Transcribe with the restart-and-retry recovery path
    ///
    /// Each failure restarts the STT and VAD services, waits out the
    /// warm-up, then retries; after the bounded attempts are exhausted
    /// the last error is returned and the caller reverts the call.
    async fn transcribe_with_retry(
        &self,
        host: &str,
        request: &SttRequest,
    ) -> std::result::Result<SttResponse, InferenceError> {
        let mut last_error = match self
            .inference
            .post::<_, SttResponse>(host, &self.settings.stt_endpoint, request)
            .await
        {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        for attempt in 1..=STT_RETRY_ATTEMPTS {
            tracing::warn!(attempt, error = %last_error, "STT failed, restarting STT and VAD services");
            self.restart_stt_services().await;

            match self
                .inference
                .post::<_, SttResponse>(host, &self.settings.stt_endpoint, request)
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    async fn restart_stt_services(&self) {
        let stt = self.settings.stt_container.clone();
        let vad = self.settings.vad_container.clone();
        if let Err(e) = self.lifecycle.stop(&stt).await {
            tracing::warn!(error = %e, "STT stop failed");
        }
        if let Err(e) = self.lifecycle.stop(&vad).await {
            tracing::warn!(error = %e, "VAD stop failed");
        }
        tokio::time::sleep(Duration::from_secs(self.settings.restart_gap_secs)).await;
        if let Err(e) = self.lifecycle.start(&stt).await {
            tracing::warn!(error = %e, "STT start failed");
        }
        if let Err(e) = self.lifecycle.start(&vad).await {
            tracing::warn!(error = %e, "VAD start failed");
        }
        if let Err(e) = self
            .lifecycle
            .wait_until_ready(&stt, Duration::from_secs(self.settings.stt_wait_secs))
            .await
        {
            tracing::warn!(error = %e, "STT readiness wait failed");
        }
    }

    /// Audit sub-stage: conversation extraction plus LLM question answering
    async fn audit_call(&self, call: CallRecord) -> Result<()> {
        let transcript = self.load_transcript(call.id).await?;
        if transcript.is_empty() {
            tracing::warn!(call_id = call.id, "Empty transcript, completing audit without answers");
            calls::set_call_status(&self.db, call.id, CallStatus::AuditDone).await?;
            self.webhook
                .notify_call_status(call.id, CallStatus::AuditDone)
                .await;
            return Ok(());
        }

        let host = call
            .ip
            .clone()
            .or_else(|| self.settings.gpu_host_list().first().cloned())
            .unwrap_or_else(|| "localhost".to_string());

        if self.settings.llm_extraction_enabled {
            match self.extract_conversation(&host, &call, &transcript).await {
                Ok(count) => {
                    tracing::info!(call_id = call.id, mentions = count, "Conversation extracted")
                }
                Err(e) => {
                    // Extraction feeds the second matching pass; give the
                    // call back rather than auditing on missing data
                    tracing::error!(call_id = call.id, error = %e, "Extraction failed, reverting to TranscriptDone");
                    calls::set_call_status(&self.db, call.id, CallStatus::TranscriptDone).await?;
                    return Ok(());
                }
            }

            if let Err(e) = self.answer_audit_questions(&host, &call, &transcript).await {
                tracing::error!(call_id = call.id, error = %e, "Audit answering failed, reverting to TranscriptDone");
                calls::set_call_status(&self.db, call.id, CallStatus::TranscriptDone).await?;
                return Ok(());
            }
        }

        calls::set_call_status(&self.db, call.id, CallStatus::AuditDone).await?;
        self.webhook
            .notify_call_status(call.id, CallStatus::AuditDone)
            .await;

        // Once every call is audited, mappings tagged by the first pass
        // can be re-scored against the extracted conversations
        if calls::count_unfinished_calls(&self.db, call.batch_id).await? == 0
            && self.settings.rule_engine_enabled
            && self.flags.try_begin_matching()
        {
            let result = second_pass::run_second_pass(
                &self.db,
                call.batch_id,
                self.settings.second_pass_batch_size,
            )
            .await;
            self.flags.end_matching();
            if let Err(e) = result {
                tracing::error!(batch_id = call.batch_id, error = %e, "Second matching pass failed");
            }
        }
        Ok(())
    }

    async fn load_transcript(&self, call_id: i64) -> Result<String> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT text FROM transcript_segments WHERE call_id = ? ORDER BY id",
        )
        .bind(call_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(text,)| text)
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn extract_conversation(
        &self,
        host: &str,
        call: &CallRecord,
        transcript: &str,
    ) -> std::result::Result<usize, InferenceError> {
        let request = ExtractionRequest {
            transcript: transcript.to_string(),
        };
        let response: ExtractionResponse = self
            .inference
            .post(host, &self.settings.llm_endpoint, &request)
            .await?;

        for mention in &response.mentions {
            let record = ConversationRecord {
                id: 0,
                call_id: call.id,
                script_name: mention.script_name.clone(),
                lot_quantity: mention.lot_quantity,
                trade_price: mention.trade_price,
                strike_price: mention.strike_price,
                current_market_price: mention.current_market_price.clone(),
                batch_id: call.batch_id,
            };
            if let Err(e) = conversations::insert_conversation(&self.db, &record).await {
                tracing::error!(call_id = call.id, error = %e, "Conversation row insert failed");
            }
        }
        Ok(response.mentions.len())
    }

    /// Ask the audit-form question catalog against the transcript
    ///
    /// The question text lives with the external NLP service; this side
    /// only records that each catalog entry was answered.
    async fn answer_audit_questions(
        &self,
        host: &str,
        call: &CallRecord,
        transcript: &str,
    ) -> std::result::Result<(), InferenceError> {
        // Q1 is reserved for the trade-matching verdict; the LLM answers
        // the remaining catalog sections
        for (section_id, sub_section_id, question_id) in [(1, 2, 2), (1, 2, 3)] {
            let request = LlmRequest {
                transcript: transcript.to_string(),
                question: format!("Q{}", question_id),
            };
            let response: LlmResponse = self
                .inference
                .post(host, &self.settings.llm_endpoint, &request)
                .await?;

            if let Err(e) = audit::insert_or_update_audit_answer(
                &self.db,
                call.process_id,
                call.id,
                section_id,
                sub_section_id,
                question_id,
                &response.answer,
            )
            .await
            {
                tracing::error!(call_id = call.id, error = %e, "Audit answer write failed");
            }
        }
        Ok(())
    }
}
