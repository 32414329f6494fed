//! Background pipeline loops and their shared exclusion state

pub mod drain;
pub mod orchestrator;
pub mod refresher;

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide exclusion flags
///
/// One instance owned by the process, mutated only through
/// compare-and-swap, so the orchestrator and the drain loop can never
/// race on the same GPU resource or double-claim a cycle. Each flag
/// guards one long-running activity; `try_begin_*` returns false when
/// the activity is already running somewhere.
#[derive(Debug, Default)]
pub struct PipelineFlags {
    request_in_progress: AtomicBool,
    audit_in_progress: AtomicBool,
    matching_in_progress: AtomicBool,
}

impl PipelineFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_begin(flag: &AtomicBool) -> bool {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the orchestrator's stage-advance cycle
    pub fn try_begin_request(&self) -> bool {
        Self::try_begin(&self.request_in_progress)
    }

    pub fn end_request(&self) {
        self.request_in_progress.store(false, Ordering::Release);
    }

    /// Claim a drain-loop processing slot
    pub fn try_begin_audit(&self) -> bool {
        Self::try_begin(&self.audit_in_progress)
    }

    pub fn end_audit(&self) {
        self.audit_in_progress.store(false, Ordering::Release);
    }

    /// Claim a matching-engine run
    pub fn try_begin_matching(&self) -> bool {
        Self::try_begin(&self.matching_in_progress)
    }

    pub fn end_matching(&self) {
        self.matching_in_progress.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_exclusive_until_released() {
        let flags = PipelineFlags::new();
        assert!(flags.try_begin_request());
        assert!(!flags.try_begin_request());
        flags.end_request();
        assert!(flags.try_begin_request());
    }

    #[test]
    fn flags_are_independent() {
        let flags = PipelineFlags::new();
        assert!(flags.try_begin_request());
        assert!(flags.try_begin_audit());
        assert!(flags.try_begin_matching());
    }
}
