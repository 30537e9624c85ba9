//! Per-session shared state: a field map, an artifact set, and boolean
//! signals, all TTL-managed.
//!
//! Artifacts are immutable once written — a second write to the same
//! identifier is a conflict. Any write extends the board's TTL to at
//! least the session default, so an artifact listed in the set stays
//! readable until TTL expiry or explicit removal.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ms_domain::error::{Error, Result};

/// Signal name the hard-stopper raises; builtin nodes poll it at
/// cancellation points.
pub const SIGNAL_ABORT: &str = "abort";

struct Board {
    fields: HashMap<String, serde_json::Value>,
    artifacts: BTreeMap<String, serde_json::Value>,
    signals: HashMap<String, bool>,
    expires_at: Instant,
}

/// Serializable copy of a board, used for cold-swap snapshots and
/// session inheritance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardExport {
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub signals: HashMap<String, bool>,
}

pub struct Blackboard {
    boards: RwLock<HashMap<String, Board>>,
    default_ttl: Duration,
}

impl Blackboard {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    fn with_board<T>(
        &self,
        session_id: &str,
        touch: bool,
        f: impl FnOnce(&mut Board) -> T,
    ) -> T {
        let mut boards = self.boards.write();
        let now = Instant::now();
        let board = boards
            .entry(session_id.to_owned())
            .or_insert_with(|| Board {
                fields: HashMap::new(),
                artifacts: BTreeMap::new(),
                signals: HashMap::new(),
                expires_at: now + self.default_ttl,
            });
        if touch {
            // Writes extend the TTL to max(current, session default).
            let candidate = now + self.default_ttl;
            if candidate > board.expires_at {
                board.expires_at = candidate;
            }
        }
        f(board)
    }

    pub fn get(&self, session_id: &str, key: &str) -> Option<serde_json::Value> {
        let boards = self.boards.read();
        let board = boards.get(session_id)?;
        if board.expires_at <= Instant::now() {
            return None;
        }
        board.fields.get(key).cloned()
    }

    pub fn set(&self, session_id: &str, key: &str, value: serde_json::Value) {
        self.with_board(session_id, true, |b| {
            b.fields.insert(key.to_owned(), value);
        });
    }

    pub fn write_artifact(
        &self,
        session_id: &str,
        artifact_id: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.with_board(session_id, true, |b| {
            if b.artifacts.contains_key(artifact_id) {
                return Err(Error::Conflict(format!(
                    "artifact {artifact_id:?} already written for session {session_id}"
                )));
            }
            b.artifacts.insert(artifact_id.to_owned(), value);
            Ok(())
        })
    }

    pub fn read_artifact(
        &self,
        session_id: &str,
        artifact_id: &str,
    ) -> Option<serde_json::Value> {
        let boards = self.boards.read();
        let board = boards.get(session_id)?;
        if board.expires_at <= Instant::now() {
            return None;
        }
        board.artifacts.get(artifact_id).cloned()
    }

    pub fn list_artifacts(&self, session_id: &str) -> Vec<String> {
        let boards = self.boards.read();
        match boards.get(session_id) {
            Some(board) if board.expires_at > Instant::now() => {
                board.artifacts.keys().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn set_signal(&self, session_id: &str, name: &str, value: bool) {
        self.with_board(session_id, true, |b| {
            b.signals.insert(name.to_owned(), value);
        });
    }

    pub fn get_signal(&self, session_id: &str, name: &str) -> bool {
        let boards = self.boards.read();
        boards
            .get(session_id)
            .and_then(|b| b.signals.get(name).copied())
            .unwrap_or(false)
    }

    /// Serializable copy of the board (snapshots, inheritance).
    pub fn export(&self, session_id: &str) -> BoardExport {
        let boards = self.boards.read();
        match boards.get(session_id) {
            Some(board) => BoardExport {
                fields: board.fields.clone(),
                artifacts: board.artifacts.clone(),
                signals: board.signals.clone(),
            },
            None => BoardExport::default(),
        }
    }

    /// Replace the board from an export (cold-swap rehydration).
    pub fn import(&self, session_id: &str, export: BoardExport) {
        let mut boards = self.boards.write();
        boards.insert(
            session_id.to_owned(),
            Board {
                fields: export.fields,
                artifacts: export.artifacts,
                signals: export.signals,
                expires_at: Instant::now() + self.default_ttl,
            },
        );
    }

    /// Copy selected artifacts into another session's board. Missing
    /// ids are skipped; the source board is not modified.
    pub fn copy_artifacts(
        &self,
        from_session: &str,
        to_session: &str,
        artifact_ids: &[String],
    ) -> usize {
        let selected: Vec<(String, serde_json::Value)> = {
            let boards = self.boards.read();
            match boards.get(from_session) {
                Some(board) => artifact_ids
                    .iter()
                    .filter_map(|id| board.artifacts.get(id).map(|v| (id.clone(), v.clone())))
                    .collect(),
                None => Vec::new(),
            }
        };
        let copied = selected.len();
        self.with_board(to_session, true, |b| {
            for (id, value) in selected {
                b.artifacts.entry(id).or_insert(value);
            }
        });
        copied
    }

    pub fn remove(&self, session_id: &str) {
        self.boards.write().remove(session_id);
    }

    /// Drop expired boards; returns the session ids that were evicted.
    pub fn purge_expired(&self) -> Vec<String> {
        let mut boards = self.boards.write();
        let now = Instant::now();
        let expired: Vec<String> = boards
            .iter()
            .filter(|(_, b)| b.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            boards.remove(key);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Blackboard {
        Blackboard::new(Duration::from_secs(1800))
    }

    #[test]
    fn fields_round_trip() {
        let bb = board();
        bb.set("s1", "routed_scene", serde_json::json!("procurement"));
        assert_eq!(
            bb.get("s1", "routed_scene"),
            Some(serde_json::json!("procurement"))
        );
        assert_eq!(bb.get("s1", "missing"), None);
        assert_eq!(bb.get("other", "routed_scene"), None);
    }

    #[test]
    fn artifacts_are_immutable() {
        let bb = board();
        bb.write_artifact("s1", "search_result", serde_json::json!([1, 2]))
            .unwrap();
        let err = bb
            .write_artifact("s1", "search_result", serde_json::json!([3]))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        // First write survives.
        assert_eq!(
            bb.read_artifact("s1", "search_result"),
            Some(serde_json::json!([1, 2]))
        );
    }

    #[test]
    fn listed_artifacts_are_readable() {
        let bb = board();
        for id in ["a", "b", "c"] {
            bb.write_artifact("s1", id, serde_json::json!(id)).unwrap();
        }
        for id in bb.list_artifacts("s1") {
            assert!(bb.read_artifact("s1", &id).is_some());
        }
        assert_eq!(bb.list_artifacts("s1").len(), 3);
    }

    #[test]
    fn signals_default_false() {
        let bb = board();
        assert!(!bb.get_signal("s1", SIGNAL_ABORT));
        bb.set_signal("s1", SIGNAL_ABORT, true);
        assert!(bb.get_signal("s1", SIGNAL_ABORT));
    }

    #[test]
    fn export_import_round_trip() {
        let bb = board();
        bb.set("s1", "k", serde_json::json!(1));
        bb.write_artifact("s1", "a", serde_json::json!("x")).unwrap();
        let export = bb.export("s1");

        let bb2 = board();
        bb2.import("s9", export);
        assert_eq!(bb2.get("s9", "k"), Some(serde_json::json!(1)));
        assert_eq!(bb2.read_artifact("s9", "a"), Some(serde_json::json!("x")));
    }

    #[test]
    fn copy_artifacts_leaves_source_untouched() {
        let bb = board();
        bb.write_artifact("src", "a", serde_json::json!(1)).unwrap();
        bb.write_artifact("src", "b", serde_json::json!(2)).unwrap();

        let copied = bb.copy_artifacts("src", "dst", &["a".into(), "ghost".into()]);
        assert_eq!(copied, 1);
        assert_eq!(bb.read_artifact("dst", "a"), Some(serde_json::json!(1)));
        assert_eq!(bb.read_artifact("dst", "b"), None);
        assert_eq!(bb.list_artifacts("src").len(), 2);
    }

    #[test]
    fn expiry_evicts_board() {
        let bb = Blackboard::new(Duration::from_millis(0));
        bb.set("s1", "k", serde_json::json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(bb.get("s1", "k"), None);
        assert_eq!(bb.purge_expired(), vec!["s1".to_owned()]);
    }
}
