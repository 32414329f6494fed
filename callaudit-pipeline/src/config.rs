//! Environment-driven service configuration
//!
//! Every knob has a compiled default so a bare process comes up against
//! localhost; deployments override through `CALLAUDIT_*` variables.

use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_or_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Service settings, loaded once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database file path
    pub database_path: String,

    /// Comma-separated GPU worker hosts running the mediator service
    pub gpu_hosts: String,
    /// Mediator service port on each GPU host
    pub mediator_port: u16,

    /// Intake folder containing one sub-folder per batch date
    pub intake_dir: String,
    /// Working-copy folder for audio handed to LID
    pub lid_copy_dir: String,

    /// Orchestrator poll interval
    pub poll_interval_secs: u64,
    /// Call drain loop poll interval
    pub drain_interval_secs: u64,

    /// Optional stages
    pub denoise_enabled: bool,
    pub ivr_enabled: bool,
    pub rule_engine_enabled: bool,
    pub llm_extraction_enabled: bool,

    /// Container names per GPU service
    pub denoise_container: String,
    pub ivr_container: String,
    pub lid_container: String,
    pub stt_container: String,
    pub vad_container: String,
    pub llm_container: String,

    /// Warm-up waits after container start (seconds)
    pub denoise_wait_secs: u64,
    pub ivr_wait_secs: u64,
    pub lid_wait_secs: u64,
    pub stt_wait_secs: u64,
    pub llm_wait_secs: u64,
    /// Settle wait between stop and restart during recovery
    pub restart_gap_secs: u64,

    /// Inference endpoint paths on the mediator
    pub denoise_endpoint: String,
    pub ivr_endpoint: String,
    pub lid_endpoint: String,
    pub stt_endpoint: String,
    pub llm_endpoint: String,
    pub translate_endpoint: String,

    /// External audit server base URL for status webhooks
    pub audit_server_url: String,

    /// Languages the STT stack supports, comma-separated
    pub supported_languages: String,

    /// Identity carried onto new call records
    pub process_id: i64,
    pub category_mapping_id: i64,

    /// Bounded fan-out pool size for stage dispatch
    pub dispatch_concurrency: usize,
    /// Outbound HTTP timeout for inference calls (seconds)
    pub http_timeout_secs: u64,
    /// Row batch size for second-pass mapping updates
    pub second_pass_batch_size: usize,

    /// HTTP listen address for the exposed boundary
    pub listen_addr: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            database_path: env_or_str("CALLAUDIT_DB_PATH", "callaudit.db"),
            gpu_hosts: env_or_str("CALLAUDIT_GPU_HOSTS", "localhost"),
            mediator_port: env_or("CALLAUDIT_MEDIATOR_PORT", 5065),
            intake_dir: env_or_str("CALLAUDIT_INTAKE_DIR", "/client_volume"),
            lid_copy_dir: env_or_str("CALLAUDIT_LID_COPY_DIR", "/client_volume/lid"),
            poll_interval_secs: env_or("CALLAUDIT_POLL_INTERVAL_SECS", 60),
            drain_interval_secs: env_or("CALLAUDIT_DRAIN_INTERVAL_SECS", 10),
            denoise_enabled: env_flag("CALLAUDIT_DENOISE_ENABLED", false),
            ivr_enabled: env_flag("CALLAUDIT_IVR_ENABLED", true),
            rule_engine_enabled: env_flag("CALLAUDIT_RULE_ENGINE_ENABLED", true),
            llm_extraction_enabled: env_flag("CALLAUDIT_LLM_EXTRACTION_ENABLED", true),
            denoise_container: env_or_str("CALLAUDIT_DENOISE_CONTAINER", "callaudit-denoise-1"),
            ivr_container: env_or_str("CALLAUDIT_IVR_CONTAINER", "callaudit-ivr-1"),
            lid_container: env_or_str("CALLAUDIT_LID_CONTAINER", "callaudit-lid-1"),
            stt_container: env_or_str("CALLAUDIT_STT_CONTAINER", "callaudit-stt-inference-1"),
            vad_container: env_or_str("CALLAUDIT_VAD_CONTAINER", "callaudit-vad-1"),
            llm_container: env_or_str("CALLAUDIT_LLM_CONTAINER", "callaudit-llm-extraction-1"),
            denoise_wait_secs: env_or("CALLAUDIT_DENOISE_WAIT_SECS", 60),
            ivr_wait_secs: env_or("CALLAUDIT_IVR_WAIT_SECS", 60),
            lid_wait_secs: env_or("CALLAUDIT_LID_WAIT_SECS", 60),
            stt_wait_secs: env_or("CALLAUDIT_STT_WAIT_SECS", 180),
            llm_wait_secs: env_or("CALLAUDIT_LLM_WAIT_SECS", 300),
            restart_gap_secs: env_or("CALLAUDIT_RESTART_GAP_SECS", 30),
            denoise_endpoint: env_or_str("CALLAUDIT_DENOISE_ENDPOINT", "/file_denoise"),
            ivr_endpoint: env_or_str("CALLAUDIT_IVR_ENDPOINT", "/file_ivr_clean"),
            lid_endpoint: env_or_str("CALLAUDIT_LID_ENDPOINT", "/file_stt_features"),
            stt_endpoint: env_or_str("CALLAUDIT_STT_ENDPOINT", "/file_stt_transcript"),
            llm_endpoint: env_or_str("CALLAUDIT_LLM_ENDPOINT", "/extract_information"),
            translate_endpoint: env_or_str("CALLAUDIT_TRANSLATE_ENDPOINT", "/translate"),
            audit_server_url: env_or_str("CALLAUDIT_AUDIT_SERVER_URL", "http://localhost:8000"),
            supported_languages: env_or_str("CALLAUDIT_SUPPORTED_LANGUAGES", "en,hi,hinglish"),
            process_id: env_or("CALLAUDIT_PROCESS_ID", 1),
            category_mapping_id: env_or("CALLAUDIT_CATEGORY_MAPPING_ID", 1),
            dispatch_concurrency: env_or("CALLAUDIT_DISPATCH_CONCURRENCY", 8),
            http_timeout_secs: env_or("CALLAUDIT_HTTP_TIMEOUT_SECS", 600),
            second_pass_batch_size: env_or("CALLAUDIT_SECOND_PASS_BATCH_SIZE", 10_000),
            listen_addr: env_or_str("CALLAUDIT_LISTEN_ADDR", "127.0.0.1:5820"),
        }
    }

    /// Parse comma-separated GPU hosts into a list
    pub fn gpu_host_list(&self) -> Vec<String> {
        self.gpu_hosts
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Parse comma-separated supported languages into a list
    pub fn supported_language_list(&self) -> Vec<String> {
        self.supported_languages
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_env()
    }
}
