//! Pipeline event types
//!
//! Events describing batch/stage/file progress, persisted by the service
//! and read by the external monitoring dashboard. The enum is serialized
//! with an adjacent `type` tag so the dashboard can dispatch on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A stage began processing a batch
    StageStarted {
        batch_id: i64,
        stage: String,
        total_files: i64,
        timestamp: DateTime<Utc>,
    },

    /// Periodic progress within a stage
    StageProgress {
        batch_id: i64,
        stage: String,
        processed_files: i64,
        total_files: i64,
        timestamp: DateTime<Utc>,
    },

    /// A stage finished for a batch
    StageCompleted {
        batch_id: i64,
        stage: String,
        succeeded: i64,
        failed: i64,
        timestamp: DateTime<Utc>,
    },

    /// A single file failed within a stage (non-fatal)
    FileError {
        batch_id: i64,
        stage: String,
        file: String,
        error: String,
        endpoint: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Informational note attached to a stage
    StageNote {
        batch_id: i64,
        stage: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A call changed status (mirrors the webhook payload)
    CallStatusChanged {
        call_id: i64,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Stage name the event belongs to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineEvent::StageStarted { stage, .. }
            | PipelineEvent::StageProgress { stage, .. }
            | PipelineEvent::StageCompleted { stage, .. }
            | PipelineEvent::FileError { stage, .. }
            | PipelineEvent::StageNote { stage, .. } => Some(stage),
            PipelineEvent::CallStatusChanged { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json_with_type_tag() {
        let event = PipelineEvent::StageStarted {
            batch_id: 7,
            stage: "lid".to_string(),
            total_files: 120,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StageStarted");
        assert_eq!(json["stage"], "lid");

        let back: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.stage(), Some("lid"));
    }
}
