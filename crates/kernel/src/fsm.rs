//! Atomic state machine per session.
//!
//! Current state lives in the fast store under `fsm:{tenant}:{session}`;
//! the read-of-current and write-of-next happen as one compare-and-swap.
//! A loser of the race gets [`Advance::Conflict`] with the state it lost
//! to and re-reads before retrying.

use std::sync::Arc;

use ms_domain::error::{Error, Result};
use ms_domain::flow::FlowDefinition;
use ms_store::fast::{CasOutcome, FastStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Advanced {
        from: String,
        to: String,
        fan_in: bool,
    },
    Conflict {
        current: String,
    },
}

pub struct Fsm {
    store: Arc<FastStore>,
    prefix: String,
}

impl Fsm {
    pub fn new(store: Arc<FastStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, tenant_id: &str, session_id: &str) -> String {
        format!("{}:fsm:{tenant_id}:{session_id}", self.prefix)
    }

    /// Install the initial state for a new (or rehydrated) session.
    pub fn init(&self, tenant_id: &str, session_id: &str, state: &str) {
        self.store.set(&self.key(tenant_id, session_id), state);
    }

    pub fn current(&self, tenant_id: &str, session_id: &str) -> Option<String> {
        self.store.get(&self.key(tenant_id, session_id))
    }

    /// Force the state unconditionally. Reserved for the hard-stopper
    /// and for error-state fallback; ordinary transitions go through
    /// [`Fsm::advance_atomic`].
    pub fn force(&self, tenant_id: &str, session_id: &str, state: &str) {
        self.store.set(&self.key(tenant_id, session_id), state);
    }

    pub fn clear(&self, tenant_id: &str, session_id: &str) {
        self.store.remove(&self.key(tenant_id, session_id));
    }

    /// One atomic advance: look up the transition for `event` from the
    /// currently stored state and CAS to its target.
    ///
    /// Errors:
    /// - `SessionNotFound` when no state is stored (evicted session);
    /// - `InvalidTransition` when the current state has no transition
    ///   for `event`, or is terminal and `event` is not RESET.
    pub fn advance_atomic(
        &self,
        flow: &FlowDefinition,
        tenant_id: &str,
        session_id: &str,
        event: &str,
    ) -> Result<Advance> {
        let key = self.key(tenant_id, session_id);
        let current = self
            .store
            .get(&key)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;

        if FlowDefinition::is_terminal(&current) && event != "RESET" {
            return Err(Error::InvalidTransition {
                state: current,
                event: event.to_owned(),
            });
        }

        let (to, fan_in) = if event == "RESET" {
            (flow.initial_state.clone(), false)
        } else {
            let t = flow.transition_for(&current, event).ok_or_else(|| {
                Error::InvalidTransition {
                    state: current.clone(),
                    event: event.to_owned(),
                }
            })?;
            (t.to.clone(), t.fan_in)
        };

        match self.store.compare_and_swap(&key, Some(&current), &to) {
            CasOutcome::Swapped => Ok(Advance::Advanced {
                from: current,
                to,
                fan_in,
            }),
            CasOutcome::Mismatch(now) => Ok(Advance::Conflict {
                current: now.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> FlowDefinition {
        FlowDefinition::from_yaml(
            r#"
name: t
states: [a, b, end, error, aborted]
initial_state: a
transitions:
  - { from: a, event: STEP_DONE, to: b }
  - { from: b, event: STEP_DONE, to: end }
"#,
        )
        .unwrap()
    }

    fn fsm() -> Fsm {
        Fsm::new(Arc::new(FastStore::new()), "maestro")
    }

    #[test]
    fn advances_along_transitions() {
        let fsm = fsm();
        let flow = flow();
        fsm.init("t1", "s1", &flow.initial_state);

        let adv = fsm.advance_atomic(&flow, "t1", "s1", "STEP_DONE").unwrap();
        assert_eq!(
            adv,
            Advance::Advanced {
                from: "a".into(),
                to: "b".into(),
                fan_in: false
            }
        );
        assert_eq!(fsm.current("t1", "s1").as_deref(), Some("b"));
    }

    #[test]
    fn unknown_event_is_invalid_transition() {
        let fsm = fsm();
        let flow = flow();
        fsm.init("t1", "s1", "a");
        let err = fsm
            .advance_atomic(&flow, "t1", "s1", "USER_CONFIRM")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        // State unchanged after a refused event.
        assert_eq!(fsm.current("t1", "s1").as_deref(), Some("a"));
    }

    #[test]
    fn terminal_states_only_leave_via_reset() {
        let fsm = fsm();
        let flow = flow();
        fsm.init("t1", "s1", "end");

        assert!(fsm.advance_atomic(&flow, "t1", "s1", "STEP_DONE").is_err());
        let adv = fsm.advance_atomic(&flow, "t1", "s1", "RESET").unwrap();
        assert_eq!(
            adv,
            Advance::Advanced {
                from: "end".into(),
                to: "a".into(),
                fan_in: false
            }
        );
    }

    #[test]
    fn missing_state_is_session_not_found() {
        let fsm = fsm();
        let err = fsm
            .advance_atomic(&flow(), "t1", "ghost", "STEP_DONE")
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[test]
    fn racing_advances_have_one_winner() {
        let store = Arc::new(FastStore::new());
        let fsm = Arc::new(Fsm::new(store, "maestro"));
        let flow = Arc::new(flow());
        fsm.init("t1", "s1", "a");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fsm = fsm.clone();
                let flow = flow.clone();
                std::thread::spawn(move || {
                    fsm.advance_atomic(&flow, "t1", "s1", "STEP_DONE").unwrap()
                })
            })
            .collect();

        let outcomes: Vec<Advance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = outcomes
            .iter()
            .filter(|a| matches!(a, Advance::Advanced { .. }))
            .count();
        assert_eq!(winners, 1);
        for outcome in outcomes {
            if let Advance::Conflict { current } = outcome {
                assert_eq!(current, "b");
            }
        }
    }
}
