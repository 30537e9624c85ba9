//! Process-wide counters surfaced at `/api/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Metrics {
    started_at: Instant,
    pub chat_turns: AtomicU64,
    pub frames_sent: AtomicU64,
    pub sessions_started: AtomicU64,
    pub tools_dispatched: AtomicU64,
    pub webhook_callbacks: AtomicU64,
    pub hard_stops: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            chat_turns: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            tools_dispatched: AtomicU64::new(0),
            webhook_callbacks: AtomicU64::new(0),
            hard_stops: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "chat_turns": self.chat_turns.load(Ordering::Relaxed),
            "frames_sent": self.frames_sent.load(Ordering::Relaxed),
            "sessions_started": self.sessions_started.load(Ordering::Relaxed),
            "tools_dispatched": self.tools_dispatched.load(Ordering::Relaxed),
            "webhook_callbacks": self.webhook_callbacks.load(Ordering::Relaxed),
            "hard_stops": self.hard_stops.load(Ordering::Relaxed),
        })
    }
}
