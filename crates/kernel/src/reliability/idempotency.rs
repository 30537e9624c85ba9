//! The idempotency guard in front of node execution.
//!
//! Contract: for a given `(session, step, attempt)` tuple, once
//! `after(success)` has returned, no caller ever observes `proceed`
//! again — duplicate effect is structurally impossible.

use std::sync::Arc;

use ms_store::repo::{Gate, IdempotencyLog, IdempotencyStatus};

/// What the dispatcher should do with a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    /// A prior attempt already succeeded; carries its result digest.
    Skip(Option<String>),
    /// Another dispatcher invocation is executing this tuple right now.
    Busy,
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    log: Arc<IdempotencyLog>,
}

impl IdempotencyGuard {
    pub fn new(log: Arc<IdempotencyLog>) -> Self {
        Self { log }
    }

    /// Gate one execution attempt. Writes the `started` row when the
    /// decision is [`Decision::Proceed`].
    pub fn before(&self, session_id: &str, step: &str, attempt: u32) -> Decision {
        match self.log.begin(session_id, step, attempt) {
            Gate::Proceed => Decision::Proceed,
            Gate::SkipSucceeded(digest) => Decision::Skip(digest),
            Gate::Busy => Decision::Busy,
            // A prior error on the same attempt means the earlier run
            // died between `started` and `finish`; re-running it cannot
            // duplicate effect, so take the row over.
            Gate::PriorError => {
                self.log.finish(
                    session_id,
                    step,
                    attempt,
                    IdempotencyStatus::Started,
                    None,
                );
                Decision::Proceed
            }
        }
    }

    /// Record the terminal status of an attempt handed out by `before`.
    pub fn after(
        &self,
        session_id: &str,
        step: &str,
        attempt: u32,
        success: bool,
        digest: Option<String>,
    ) {
        let status = if success {
            IdempotencyStatus::Success
        } else {
            IdempotencyStatus::Error
        };
        self.log.finish(session_id, step, attempt, status, digest);
    }

    /// Highest attempt ever started for `(session, step)`.
    pub fn last_attempt(&self, session_id: &str, step: &str) -> Option<u32> {
        self.log.last_attempt(session_id, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (tempfile::TempDir, IdempotencyGuard) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(IdempotencyLog::open(dir.path()).unwrap());
        (dir, IdempotencyGuard::new(log))
    }

    #[test]
    fn proceed_then_skip_after_success() {
        let (_dir, guard) = guard();
        assert_eq!(guard.before("s1", "search", 1), Decision::Proceed);
        guard.after("s1", "search", 1, true, Some("d".into()));
        assert_eq!(guard.before("s1", "search", 1), Decision::Skip(Some("d".into())));
    }

    #[test]
    fn concurrent_holder_sees_busy() {
        let (_dir, guard) = guard();
        assert_eq!(guard.before("s1", "search", 1), Decision::Proceed);
        assert_eq!(guard.before("s1", "search", 1), Decision::Busy);
    }

    #[test]
    fn error_attempt_can_be_retaken() {
        let (_dir, guard) = guard();
        guard.before("s1", "search", 1);
        guard.after("s1", "search", 1, false, None);
        // Same attempt after a recorded error is re-runnable.
        assert_eq!(guard.before("s1", "search", 1), Decision::Proceed);
    }
}
