//! Typed payloads for the GPU inference endpoints
//!
//! One request/response pair per endpoint (LID, denoise, IVR, STT, LLM
//! extraction, translation). The client is a thin reqwest wrapper with a
//! long timeout; there is no cooperative cancellation of in-flight GPU
//! work; a stuck call is recovered by container restart upstream.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Inference client errors
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Endpoint error {0}: {1}")]
    Endpoint(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Request body shared by the per-file stages (LID / denoise / IVR)
#[derive(Debug, Clone, Serialize)]
pub struct FileStageRequest {
    pub file_name: String,
    pub entity: String,
    pub response: String,
}

impl FileStageRequest {
    pub fn new(file_name: &str, entity: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            entity: entity.to_string(),
            response: String::new(),
        }
    }
}

/// `data.derived_value[0]` of a LID response
#[derive(Debug, Clone, Deserialize)]
pub struct LidDerivedValue {
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub audio_duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LidData {
    #[serde(default)]
    pub derived_value: Vec<LidDerivedValue>,
}

/// LID endpoint response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct LidResponse {
    pub data: LidData,
}

impl LidResponse {
    /// Detected language, normalized the way the rest of the pipeline
    /// expects: 3-letter codes truncated to 2 ("hin" -> "hi").
    pub fn language(&self) -> String {
        let raw = self
            .data
            .derived_value
            .first()
            .and_then(|d| d.results.first())
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        if raw.len() == 3 {
            raw[..2].to_string()
        } else {
            raw
        }
    }

    pub fn audio_duration(&self) -> f64 {
        self.data
            .derived_value
            .first()
            .map(|d| d.audio_duration)
            .unwrap_or(0.0)
    }
}

/// STT transcription request
#[derive(Debug, Clone, Serialize)]
pub struct SttRequest {
    pub file_name: String,
    pub audio_language: String,
    pub diarization: i64,
}

impl SttRequest {
    /// "hinglish" is transcribed with the Hindi model
    pub fn new(file_name: &str, language: &str, diarization: bool) -> Self {
        let audio_language = if language == "hinglish" { "hi" } else { language };
        Self {
            file_name: file_name.to_string(),
            audio_language: audio_language.to_string(),
            diarization: diarization as i64,
        }
    }
}

/// One transcribed chunk from the STT service
#[derive(Debug, Clone, Deserialize)]
pub struct SttChunk {
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub text: String,
    pub confidence: Option<f64>,
}

/// STT transcription response
#[derive(Debug, Clone, Deserialize)]
pub struct SttResponse {
    #[serde(default)]
    pub chunks: Vec<SttChunk>,
    #[serde(default)]
    pub audio_file_duration: f64,
}

impl SttResponse {
    /// Full transcript text for downstream LLM calls
    pub fn transcript(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// LLM extraction / audit question request
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    pub transcript: String,
    pub question: String,
}

/// LLM extraction / audit question response
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    #[serde(default)]
    pub answer: String,
}

/// Conversation extraction request (LLM endpoint)
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest {
    pub transcript: String,
}

/// One stock mention extracted from a transcript
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedMention {
    #[serde(default)]
    pub script_name: String,
    pub lot_quantity: Option<f64>,
    pub trade_price: Option<f64>,
    pub strike_price: Option<f64>,
    /// "YES" when the mention referenced the current market price
    pub current_market_price: Option<String>,
}

/// Conversation extraction response
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionResponse {
    #[serde(default)]
    pub mentions: Vec<ExtractedMention>,
}

/// Translation request
#[derive(Debug, Clone, Serialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

/// Translation response
#[derive(Debug, Clone, Deserialize)]
pub struct TranslateResponse {
    #[serde(default)]
    pub translated_text: String,
}

/// Thin HTTP client for inference endpoints on the GPU hosts
#[derive(Clone)]
pub struct InferenceClient {
    http_client: reqwest::Client,
    port: u16,
}

impl InferenceClient {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, InferenceError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Network(e.to_string()))?;
        Ok(Self { http_client, port })
    }

    /// POST a JSON payload to `endpoint` on `host`, decoding JSON back
    pub async fn post<Req, Resp>(
        &self,
        host: &str,
        endpoint: &str,
        payload: &Req,
    ) -> Result<Resp, InferenceError>
    where
        Req: Serialize + ?Sized,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("http://{}:{}{}", host, self.port, endpoint);
        tracing::debug!(url = %url, "Calling inference endpoint");

        let response = self
            .http_client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| InferenceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Endpoint(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| InferenceError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lid_response_truncates_three_letter_codes() {
        let response: LidResponse = serde_json::from_value(serde_json::json!({
            "data": {
                "derived_value": [
                    {"results": ["hin"], "audio_duration": 120.5}
                ]
            }
        }))
        .unwrap();

        assert_eq!(response.language(), "hi");
        assert!((response.audio_duration() - 120.5).abs() < f64::EPSILON);
    }

    #[test]
    fn lid_response_defaults_to_unknown() {
        let response: LidResponse =
            serde_json::from_value(serde_json::json!({"data": {"derived_value": []}})).unwrap();
        assert_eq!(response.language(), "unknown");
        assert_eq!(response.audio_duration(), 0.0);
    }

    #[test]
    fn stt_request_maps_hinglish_to_hindi() {
        let request = SttRequest::new("a.wav", "hinglish", false);
        assert_eq!(request.audio_language, "hi");

        let request = SttRequest::new("a.wav", "en", true);
        assert_eq!(request.audio_language, "en");
        assert_eq!(request.diarization, 1);
    }
}
