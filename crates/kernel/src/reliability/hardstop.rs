//! Hard stop.
//!
//! `abort` raises three flags at once: an abort key in the fast store
//! (checked by the dispatcher before any work), the `abort` signal on
//! the blackboard (polled by builtin nodes at cancellation points), and
//! an ABORT event on the log and bus (seen by streaming clients).
//! Webhook results that arrive after the abort are recorded for audit
//! and dropped.

use std::sync::Arc;

use ms_domain::event::{Event, EventType};
use ms_domain::trace::TraceEvent;
use ms_store::blackboard::{Blackboard, SIGNAL_ABORT};
use ms_store::bus::EventBus;
use ms_store::fast::FastStore;
use ms_store::repo::EventRepository;

pub struct HardStopper {
    store: Arc<FastStore>,
    blackboard: Arc<Blackboard>,
    bus: EventBus,
    events: Arc<EventRepository>,
    prefix: String,
}

impl HardStopper {
    pub fn new(
        store: Arc<FastStore>,
        blackboard: Arc<Blackboard>,
        bus: EventBus,
        events: Arc<EventRepository>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            blackboard,
            bus,
            events,
            prefix: prefix.into(),
        }
    }

    fn key(&self, tenant_id: &str, session_id: &str) -> String {
        format!("{}:abort:{tenant_id}:{session_id}", self.prefix)
    }

    pub async fn abort(
        &self,
        tenant_id: &str,
        session_id: &str,
        reason: &str,
        trace_id: &str,
    ) {
        self.store.set(&self.key(tenant_id, session_id), "1");
        self.blackboard.set_signal(session_id, SIGNAL_ABORT, true);

        TraceEvent::AbortRequested {
            session_id: session_id.to_owned(),
            reason: reason.to_owned(),
        }
        .emit();

        let event = self.events.append(
            Event::new(EventType::Abort, tenant_id, session_id, "hard_stopper", trace_id)
                .with_payload(serde_json::json!({ "reason": reason })),
        );
        self.bus.publish(tenant_id, &event).await;
    }

    pub fn is_aborted(&self, tenant_id: &str, session_id: &str) -> bool {
        self.store.get(&self.key(tenant_id, session_id)).is_some()
    }

    /// Clear the abort flag (RESET path).
    pub fn clear(&self, tenant_id: &str, session_id: &str) {
        self.store.remove(&self.key(tenant_id, session_id));
        self.blackboard.set_signal(session_id, SIGNAL_ABORT, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stopper() -> (tempfile::TempDir, HardStopper, Arc<EventRepository>) {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventRepository::open(dir.path()).unwrap());
        let stopper = HardStopper::new(
            Arc::new(FastStore::new()),
            Arc::new(Blackboard::new(Duration::from_secs(60))),
            EventBus::new("maestro"),
            events.clone(),
            "maestro",
        );
        (dir, stopper, events)
    }

    #[tokio::test]
    async fn abort_raises_flag_signal_and_event() {
        let (_dir, stopper, events) = stopper();
        assert!(!stopper.is_aborted("t1", "s1"));

        stopper.abort("t1", "s1", "user requested", "tr").await;

        assert!(stopper.is_aborted("t1", "s1"));
        assert!(stopper.blackboard.get_signal("s1", SIGNAL_ABORT));
        let log = events.list_by_session("s1");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_type, EventType::Abort);
        assert_eq!(log[0].payload["reason"], "user requested");
    }

    #[tokio::test]
    async fn abort_is_published_to_subscribers() {
        let (_dir, stopper, _) = stopper();
        let mut sub = stopper.bus.subscribe("t1");
        stopper.abort("t1", "s1", "shutdown", "tr").await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Abort);
    }

    #[tokio::test]
    async fn clear_resets_both_flags() {
        let (_dir, stopper, _) = stopper();
        stopper.abort("t1", "s1", "x", "tr").await;
        stopper.clear("t1", "s1");
        assert!(!stopper.is_aborted("t1", "s1"));
        assert!(!stopper.blackboard.get_signal("s1", SIGNAL_ABORT));
    }
}
