//! Fan-in readiness checks, answered from the event log.
//!
//! A prerequisite step is ready iff its last recorded event for the
//! session is a successful STEP_DONE. Completion order does not matter;
//! ties are broken by event-log insertion order.

use std::sync::Arc;

use ms_store::repo::EventRepository;

#[derive(Clone)]
pub struct FanInChecker {
    events: Arc<EventRepository>,
}

impl FanInChecker {
    pub fn new(events: Arc<EventRepository>) -> Self {
        Self { events }
    }

    pub fn ready(&self, session_id: &str, steps: &[String]) -> bool {
        steps.iter().all(|s| self.events.step_ready(session_id, s))
    }

    /// The prerequisites still missing, for the EVENT_PENDING_FANIN
    /// payload.
    pub fn missing(&self, session_id: &str, steps: &[String]) -> Vec<String> {
        steps
            .iter()
            .filter(|s| !self.events.step_ready(session_id, s))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_domain::event::{Event, EventType};

    fn checker() -> (tempfile::TempDir, FanInChecker, Arc<EventRepository>) {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventRepository::open(dir.path()).unwrap());
        (dir, FanInChecker::new(events.clone()), events)
    }

    fn step_done(events: &EventRepository, step: &str) {
        events.append(
            Event::new(EventType::StepDone, "t1", "s1", step, "tr")
                .with_payload(serde_json::json!({"status": "success"})),
        );
    }

    #[test]
    fn ready_once_all_branches_report() {
        let (_dir, checker, events) = checker();
        let prereqs = vec!["search_a".to_owned(), "search_b".to_owned()];

        assert!(!checker.ready("s1", &prereqs));
        step_done(&events, "search_a");
        assert!(!checker.ready("s1", &prereqs));
        assert_eq!(checker.missing("s1", &prereqs), vec!["search_b".to_owned()]);

        step_done(&events, "search_b");
        assert!(checker.ready("s1", &prereqs));
        assert!(checker.missing("s1", &prereqs).is_empty());
    }

    #[test]
    fn completion_order_is_irrelevant() {
        let (_dir, checker, events) = checker();
        let prereqs = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        for step in ["c", "a", "b"] {
            step_done(&events, step);
        }
        assert!(checker.ready("s1", &prereqs));
    }

    #[test]
    fn empty_prerequisites_are_trivially_ready() {
        let (_dir, checker, _) = checker();
        assert!(checker.ready("s1", &[]));
    }
}
