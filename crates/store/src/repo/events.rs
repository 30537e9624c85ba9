//! Append-only event log.
//!
//! Every audit record flows through [`EventRepository::append`], which
//! stamps the per-session tick and appends to a JSONL file plus an
//! in-memory index. Replay (`GET .../events`) and the fan-in checker
//! read from here, never from the bus.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use ms_domain::event::{Event, EventType};

struct Inner {
    events: Vec<Event>,
    /// session_id → indices into `events`, in insertion order.
    by_session: HashMap<String, Vec<usize>>,
    /// session_id → last assigned tick.
    ticks: HashMap<String, u64>,
}

pub struct EventRepository {
    inner: RwLock<Inner>,
    log_path: PathBuf,
    /// Serializes file appends so JSONL lines never interleave.
    file_lock: Mutex<()>,
}

impl EventRepository {
    /// Open (or create) the event log at `state_path/events.jsonl`.
    pub fn open(state_path: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let log_path = state_path.join("events.jsonl");

        let mut inner = Inner {
            events: Vec::new(),
            by_session: HashMap::new(),
            ticks: HashMap::new(),
        };
        if log_path.exists() {
            let raw = std::fs::read_to_string(&log_path)?;
            for line in raw.lines() {
                match serde_json::from_str::<Event>(line) {
                    Ok(ev) => Inner::index(&mut inner, ev),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unparseable event log line")
                    }
                }
            }
        }
        tracing::info!(
            events = inner.events.len(),
            path = %log_path.display(),
            "event log loaded"
        );

        Ok(Self {
            inner: RwLock::new(inner),
            log_path,
            file_lock: Mutex::new(()),
        })
    }

    /// Stamp the next tick for the session, append, persist. Returns
    /// the stamped event. Tick assignment and in-memory append happen
    /// under one write lock, so `(tick, created_at)` is non-decreasing
    /// in insertion order per session.
    pub fn append(&self, mut event: Event) -> Event {
        {
            let mut inner = self.inner.write();
            let tick = inner
                .ticks
                .get(&event.session_id)
                .copied()
                .unwrap_or(0)
                + 1;
            event.tick = tick;
            Inner::index(&mut inner, event.clone());
        }
        self.persist(&event);
        event
    }

    fn persist(&self, event: &Event) {
        let _guard = self.file_lock.lock();
        let line = match serde_json::to_string(event) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event for log");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %self.log_path.display(), "event log append failed");
        }
    }

    /// All events for a session, in insertion order.
    pub fn list_by_session(&self, session_id: &str) -> Vec<Event> {
        let inner = self.inner.read();
        match inner.by_session.get(session_id) {
            Some(indices) => indices.iter().map(|i| inner.events[*i].clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Events with `tick > after_tick`, for incremental replay.
    pub fn list_after_tick(&self, session_id: &str, after_tick: u64) -> Vec<Event> {
        self.list_by_session(session_id)
            .into_iter()
            .filter(|e| e.tick > after_tick)
            .collect()
    }

    /// The most recent event whose `source` is `step`.
    pub fn last_for_step(&self, session_id: &str, step: &str) -> Option<Event> {
        let inner = self.inner.read();
        let indices = inner.by_session.get(session_id)?;
        indices
            .iter()
            .rev()
            .map(|i| &inner.events[*i])
            .find(|e| e.source == step)
            .cloned()
    }

    /// Fan-in readiness for one prerequisite: the step's last recorded
    /// event must be a successful STEP_DONE.
    pub fn step_ready(&self, session_id: &str, step: &str) -> bool {
        match self.last_for_step(session_id, step) {
            Some(ev) if ev.event_type == EventType::StepDone => ev
                .payload
                .get("status")
                .and_then(|s| s.as_str())
                .map_or(true, |s| s == "success"),
            _ => false,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().by_session.len()
    }
}

impl Inner {
    fn index(inner: &mut Inner, event: Event) {
        inner
            .ticks
            .entry(event.session_id.clone())
            .and_modify(|t| *t = (*t).max(event.tick))
            .or_insert(event.tick);
        let idx = inner.events.len();
        inner
            .by_session
            .entry(event.session_id.clone())
            .or_default()
            .push(idx);
        inner.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_domain::event::EventType;

    fn repo() -> (tempfile::TempDir, EventRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = EventRepository::open(dir.path()).unwrap();
        (dir, repo)
    }

    fn ev(session: &str, event_type: EventType, source: &str) -> Event {
        Event::new(event_type, "t1", session, source, "tr")
    }

    #[test]
    fn ticks_are_monotonic_per_session() {
        let (_dir, repo) = repo();
        let a = repo.append(ev("s1", EventType::StateTransition, "fsm"));
        let b = repo.append(ev("s1", EventType::EventResult, "search"));
        let c = repo.append(ev("s2", EventType::StateTransition, "fsm"));
        assert_eq!(a.tick, 1);
        assert_eq!(b.tick, 2);
        // Independent counter per session.
        assert_eq!(c.tick, 1);
    }

    #[test]
    fn replay_equals_insertion_order() {
        let (_dir, repo) = repo();
        for source in ["a", "b", "c"] {
            repo.append(ev("s1", EventType::EventResult, source));
        }
        let replay = repo.list_by_session("s1");
        let sources: Vec<&str> = replay.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "b", "c"]);
        let ticks: Vec<u64> = replay.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = EventRepository::open(dir.path()).unwrap();
            repo.append(ev("s1", EventType::StepDone, "search"));
            repo.append(ev("s1", EventType::StateTransition, "fsm"));
        }
        let repo = EventRepository::open(dir.path()).unwrap();
        assert_eq!(repo.count(), 2);
        // Tick counter resumes, not restarts.
        let next = repo.append(ev("s1", EventType::EventResult, "writer"));
        assert_eq!(next.tick, 3);
    }

    #[test]
    fn step_ready_requires_last_event_step_done() {
        let (_dir, repo) = repo();
        assert!(!repo.step_ready("s1", "search"));

        repo.append(
            ev("s1", EventType::StepDone, "search")
                .with_payload(serde_json::json!({"status": "success"})),
        );
        assert!(repo.step_ready("s1", "search"));

        // A later error from the same step flips readiness off.
        repo.append(ev("s1", EventType::EventError, "search"));
        assert!(!repo.step_ready("s1", "search"));
    }

    #[test]
    fn after_tick_filter() {
        let (_dir, repo) = repo();
        for _ in 0..5 {
            repo.append(ev("s1", EventType::Ping, "clock"));
        }
        let tail = repo.list_after_tick("s1", 3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].tick, 4);
    }
}
