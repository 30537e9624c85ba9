//! Durable node registry table.
//!
//! Builtins are registered by the process at startup; webhooks may be
//! registered dynamically over HTTP. Every registration is upserted
//! here so peer instances converge, and the in-memory registry reloads
//! from this table at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ms_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Builtin,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    pub kind: NodeKind,
    /// Webhook endpoint; None for builtins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// JSON Schema for the node's parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// Secret used to sign callback bodies; minted at webhook
    /// registration, never returned on list endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_secret: Option<String>,
    pub registered_at: DateTime<Utc>,
}

pub struct NodeRepository {
    path: PathBuf,
    nodes: RwLock<HashMap<String, NodeRegistration>>,
}

impl NodeRepository {
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("nodes.json");
        let nodes = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            nodes: RwLock::new(nodes),
        })
    }

    pub fn upsert(&self, registration: NodeRegistration) {
        {
            let mut nodes = self.nodes.write();
            nodes.insert(registration.node_id.clone(), registration);
        }
        self.persist();
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRegistration> {
        self.nodes.read().get(node_id).cloned()
    }

    pub fn list(&self) -> Vec<NodeRegistration> {
        let mut nodes: Vec<NodeRegistration> = self.nodes.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn webhooks(&self) -> Vec<NodeRegistration> {
        self.list()
            .into_iter()
            .filter(|n| n.kind == NodeKind::Webhook)
            .collect()
    }

    fn persist(&self) {
        let nodes = self.nodes.read();
        match serde_json::to_string_pretty(&*nodes) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, "node registry persist failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "node registry serialize failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook(id: &str) -> NodeRegistration {
        NodeRegistration {
            node_id: id.into(),
            kind: NodeKind::Webhook,
            url: Some(format!("https://hooks.example.com/{id}")),
            schema: Some(serde_json::json!({"type": "object"})),
            callback_secret: Some("shh".into()),
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let repo = NodeRepository::open(dir.path()).unwrap();
        repo.upsert(webhook("quote"));
        let mut updated = webhook("quote");
        updated.url = Some("https://hooks.example.com/quote-v2".into());
        repo.upsert(updated);

        assert_eq!(repo.list().len(), 1);
        assert!(repo
            .get("quote")
            .unwrap()
            .url
            .unwrap()
            .ends_with("quote-v2"));
    }

    #[test]
    fn webhooks_filter_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = NodeRepository::open(dir.path()).unwrap();
            repo.upsert(webhook("quote"));
            repo.upsert(NodeRegistration {
                node_id: "search".into(),
                kind: NodeKind::Builtin,
                url: None,
                schema: None,
                callback_secret: None,
                registered_at: Utc::now(),
            });
        }
        let repo = NodeRepository::open(dir.path()).unwrap();
        assert_eq!(repo.list().len(), 2);
        assert_eq!(repo.webhooks().len(), 1);
        assert_eq!(repo.webhooks()[0].node_id, "quote");
    }
}
