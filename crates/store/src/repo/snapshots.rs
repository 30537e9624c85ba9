//! Cold-swap snapshots.
//!
//! When the tempo clock parks an aged-out session, its conversational
//! state moves here; a later event rehydrates the fast-store copy from
//! this table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ms_domain::error::{Error, Result};

use crate::blackboard::BoardExport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    /// Chat turns as stored by the controller (role/content objects).
    #[serde(default)]
    pub chat_history: Vec<serde_json::Value>,
    #[serde(default)]
    pub blackboard: BoardExport,
    #[serde(default)]
    pub tool_results: serde_json::Value,
    #[serde(default)]
    pub chat_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_scene: Option<String>,
    pub saved_at: DateTime<Utc>,
}

pub struct SnapshotRepository {
    path: PathBuf,
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl SnapshotRepository {
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("snapshots.json");
        let snapshots = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            snapshots: RwLock::new(snapshots),
        })
    }

    pub fn save(&self, snapshot: Snapshot) {
        {
            let mut snapshots = self.snapshots.write();
            snapshots.insert(snapshot.session_id.clone(), snapshot);
        }
        self.persist();
    }

    pub fn get(&self, session_id: &str) -> Option<Snapshot> {
        self.snapshots.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Snapshot> {
        let removed = self.snapshots.write().remove(session_id);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.snapshots.read().len()
    }

    fn persist(&self) {
        let snapshots = self.snapshots.read();
        match serde_json::to_string(&*snapshots) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, "snapshot persist failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "snapshot serialize failed"),
        }
    }
}
