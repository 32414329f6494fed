//! Call-status webhook client
//!
//! Fire-and-forget notifications to the external auditing UI. Failures
//! are logged, never retried; the pipeline does not depend on the UI
//! being reachable.

use crate::types::CallStatus;
use serde::Serialize;
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct CallStatusPayload<'a> {
    #[serde(rename = "callId")]
    call_id: i64,
    status: &'a str,
    #[serde(rename = "audioDuration", skip_serializing_if = "Option::is_none")]
    audio_duration: Option<f64>,
}

/// Client for the external audit server's status webhook
#[derive(Clone)]
pub struct WebhookClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl WebhookClient {
    pub fn new(base_url: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            base_url,
        }
    }

    /// Notify a call status change; errors are logged and swallowed
    pub async fn notify_call_status(&self, call_id: i64, status: CallStatus) {
        self.notify(call_id, status, None).await;
    }

    /// Status change with the measured audio duration attached
    pub async fn notify_call_status_with_duration(
        &self,
        call_id: i64,
        status: CallStatus,
        audio_duration: f64,
    ) {
        self.notify(call_id, status, Some(audio_duration)).await;
    }

    async fn notify(&self, call_id: i64, status: CallStatus, audio_duration: Option<f64>) {
        let url = format!("{}/api/webhook/callStatus", self.base_url);
        let payload = CallStatusPayload {
            call_id,
            status: status.as_str(),
            audio_duration,
        };

        match self.http_client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(call_id, status = %status, "Webhook sent");
            }
            Ok(response) => {
                tracing::error!(
                    call_id,
                    status = %status,
                    response_status = %response.status(),
                    "Webhook rejected"
                );
            }
            Err(e) => {
                tracing::error!(call_id, status = %status, error = %e, "Webhook failed");
            }
        }
    }
}
