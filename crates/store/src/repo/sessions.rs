//! Durable session records — the cold copy behind the fast store.
//!
//! The fast store is authoritative for a live session's current state;
//! this repository is the restart/post-TTL source of truth. Records are
//! written through on every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ms_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    WaitingUser,
    Paused,
    Completed,
    Error,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub tenant_id: String,
    pub flow_id: String,
    /// True for single-node sessions created through the chat path.
    #[serde(default)]
    pub implicit: bool,
    /// Current FSM state.
    pub state: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub params: serde_json::Value,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub ttl_secs: u64,
    /// step → attempt counter, driven by the retry policy.
    #[serde(default)]
    pub attempts: HashMap<String, u32>,
}

impl SessionRecord {
    /// Seconds since the last update.
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds()
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.idle_secs(now) >= self.ttl_secs as i64
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionRepository {
    path: PathBuf,
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionRepository {
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("sessions.json");
        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        tracing::info!(
            sessions = records.len(),
            path = %path.display(),
            "session repository loaded"
        );
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.read().get(session_id).cloned()
    }

    pub fn upsert(&self, record: SessionRecord) {
        {
            let mut records = self.records.write();
            records.insert(record.session_id.clone(), record);
        }
        self.persist();
    }

    /// Mutate a record in place; bumps `updated_at` and persists.
    /// Returns the new copy, or None when the session is unknown.
    pub fn update<F>(&self, session_id: &str, f: F) -> Option<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let updated = {
            let mut records = self.records.write();
            let record = records.get_mut(session_id)?;
            f(record);
            record.updated_at = Utc::now();
            record.clone()
        };
        self.persist();
        Some(updated)
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        let removed = self.records.write().remove(session_id);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    pub fn list(&self) -> Vec<SessionRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Sessions whose TTL has elapsed and that are not yet parked in a
    /// terminal or paused status — the tempo clock's work list.
    pub fn sweepable(&self, now: DateTime<Utc>) -> Vec<SessionRecord> {
        self.records
            .read()
            .values()
            .filter(|r| {
                r.expired(now)
                    && !matches!(
                        r.status,
                        SessionStatus::Paused
                            | SessionStatus::Completed
                            | SessionStatus::Aborted
                    )
            })
            .cloned()
            .collect()
    }

    fn persist(&self) {
        let records = self.records.read();
        match serde_json::to_string_pretty(&*records) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, path = %self.path.display(), "session persist failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "session serialize failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: id.into(),
            tenant_id: "t1".into(),
            flow_id: "procurement".into(),
            implicit: false,
            state: "search".into(),
            status: SessionStatus::Running,
            params: serde_json::Value::Null,
            trace_id: "tr".into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            ttl_secs: 1800,
            attempts: HashMap::new(),
        }
    }

    #[test]
    fn upsert_get_update() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepository::open(dir.path()).unwrap();
        repo.upsert(record("s1"));

        let updated = repo
            .update("s1", |r| {
                r.state = "compare".into();
                r.attempts.insert("search".into(), 1);
            })
            .unwrap();
        assert_eq!(updated.state, "compare");
        assert_eq!(repo.get("s1").unwrap().attempts["search"], 1);
        assert!(repo.update("ghost", |_| {}).is_none());
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = SessionRepository::open(dir.path()).unwrap();
            repo.upsert(record("s1"));
        }
        let repo = SessionRepository::open(dir.path()).unwrap();
        assert_eq!(repo.get("s1").unwrap().flow_id, "procurement");
    }

    #[test]
    fn sweepable_selects_expired_active_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepository::open(dir.path()).unwrap();

        let mut stale = record("stale");
        stale.updated_at = Utc::now() - chrono::Duration::seconds(3600);
        repo.upsert(stale);

        let mut parked = record("parked");
        parked.updated_at = Utc::now() - chrono::Duration::seconds(3600);
        parked.status = SessionStatus::Paused;
        repo.upsert(parked);

        repo.upsert(record("fresh"));

        let sweep = repo.sweepable(Utc::now());
        assert_eq!(sweep.len(), 1);
        assert_eq!(sweep[0].session_id, "stale");
    }

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(!SessionStatus::Error.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }
}
