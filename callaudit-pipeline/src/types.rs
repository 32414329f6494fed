//! Core enums shared across the pipeline
//!
//! Every persisted status is a closed enum with explicit string mapping;
//! no component reads raw status strings out of rows.

use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    DbInsertion,
    Denoise,
    Ivr,
    Lid,
    Stt,
    Audit,
    Triaging,
}

impl Stage {
    /// Column-name prefix for this stage in the batches table
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Stage::DbInsertion => "db_insertion",
            Stage::Denoise => "denoise",
            Stage::Ivr => "ivr",
            Stage::Lid => "lid",
            Stage::Stt => "stt",
            Stage::Audit => "audit",
            Stage::Triaging => "triaging",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DbInsertion => "dbInsertion",
            Stage::Denoise => "denoise",
            Stage::Ivr => "ivr",
            Stage::Lid => "lid",
            Stage::Stt => "stt",
            Stage::Audit => "audit",
            Stage::Triaging => "triaging",
        }
    }

    pub const ALL: [Stage; 7] = [
        Stage::DbInsertion,
        Stage::Denoise,
        Stage::Ivr,
        Stage::Lid,
        Stage::Stt,
        Stage::Audit,
        Stage::Triaging,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage batch status
///
/// Advances Pending -> InProgress -> Complete, never backward. The batch
/// repository enforces the direction on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    InProgress,
    Complete,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "Pending",
            StageStatus::InProgress => "InProgress",
            StageStatus::Complete => "Complete",
        }
    }

    pub fn parse(raw: &str) -> Option<StageStatus> {
        match raw {
            "Pending" => Some(StageStatus::Pending),
            "InProgress" => Some(StageStatus::InProgress),
            "Complete" => Some(StageStatus::Complete),
            _ => None,
        }
    }

    /// Ordering rank used for the monotonic-advance check
    pub fn rank(&self) -> u8 {
        match self {
            StageStatus::Pending => 0,
            StageStatus::InProgress => 1,
            StageStatus::Complete => 2,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call processing status
///
/// Linear machine with terminal side exits:
/// Pending -> Transcription -> TranscriptDone -> Auditing -> AuditDone -> Complete
/// ShortCall and UnsupportedLanguage are terminal; STT failure reverts to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Pending,
    Transcription,
    TranscriptDone,
    Auditing,
    AuditDone,
    Complete,
    ShortCall,
    UnsupportedLanguage,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "Pending",
            CallStatus::Transcription => "Transcription",
            CallStatus::TranscriptDone => "TranscriptDone",
            CallStatus::Auditing => "Auditing",
            CallStatus::AuditDone => "AuditDone",
            CallStatus::Complete => "Complete",
            CallStatus::ShortCall => "ShortCall",
            CallStatus::UnsupportedLanguage => "UnsupportedLanguage",
        }
    }

    pub fn parse(raw: &str) -> Option<CallStatus> {
        match raw {
            "Pending" => Some(CallStatus::Pending),
            "Transcription" => Some(CallStatus::Transcription),
            "TranscriptDone" => Some(CallStatus::TranscriptDone),
            "Auditing" => Some(CallStatus::Auditing),
            "AuditDone" => Some(CallStatus::AuditDone),
            "Complete" => Some(CallStatus::Complete),
            "ShortCall" => Some(CallStatus::ShortCall),
            "UnsupportedLanguage" => Some(CallStatus::UnsupportedLanguage),
            _ => None,
        }
    }

    /// Terminal statuses are never picked up again by the drain loop
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Complete | CallStatus::ShortCall | CallStatus::UnsupportedLanguage
        )
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_status_rank_is_monotone() {
        assert!(StageStatus::Pending.rank() < StageStatus::InProgress.rank());
        assert!(StageStatus::InProgress.rank() < StageStatus::Complete.rank());
    }

    #[test]
    fn call_status_round_trips() {
        for status in [
            CallStatus::Pending,
            CallStatus::Transcription,
            CallStatus::TranscriptDone,
            CallStatus::Auditing,
            CallStatus::AuditDone,
            CallStatus::Complete,
            CallStatus::ShortCall,
            CallStatus::UnsupportedLanguage,
        ] {
            assert_eq!(CallStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::parse("Bogus"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(CallStatus::ShortCall.is_terminal());
        assert!(CallStatus::UnsupportedLanguage.is_terminal());
        assert!(CallStatus::Complete.is_terminal());
        assert!(!CallStatus::Pending.is_terminal());
    }
}
