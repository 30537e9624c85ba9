//! Node references and the result contract shared by builtin executors
//! and webhook callbacks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node references
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed node reference from a flow's `state_node_map`.
///
/// Two forms: `builtin://<id>` names an in-process executor, `http://` /
/// `https://` names a webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Builtin(String),
    Webhook(String),
}

impl NodeRef {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(id) = raw.strip_prefix("builtin://") {
            if id.is_empty() {
                return Err(Error::BadRequest("empty builtin node id".into()));
            }
            return Ok(Self::Builtin(id.to_owned()));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Webhook(raw.to_owned()));
        }
        Err(Error::BadRequest(format!(
            "node ref must be builtin:// or http(s)://, got {raw:?}"
        )))
    }

    /// The registry key for this reference.
    pub fn id(&self) -> &str {
        match self {
            Self::Builtin(id) => id,
            Self::Webhook(url) => url,
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin(id) => write!(f, "builtin://{id}"),
            Self::Webhook(url) => f.write_str(url),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Error,
    NeedUserInput,
    Aborted,
}

/// What a node hands back to the dispatcher — from an in-process
/// `execute` call or a webhook callback body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub status: NodeStatus,
    #[serde(default)]
    pub result: serde_json::Value,
    /// Structured panel description relayed to the client as `ui_render`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_schema: Option<serde_json::Value>,
    /// Artifacts to persist on the blackboard, keyed by artifact id.
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    /// Extra trigger events the node wants pushed after its own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl NodeResult {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            status: NodeStatus::Success,
            result,
            ui_schema: None,
            artifacts: BTreeMap::new(),
            next_events: Vec::new(),
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Error,
            result: serde_json::Value::Null,
            ui_schema: None,
            artifacts: BTreeMap::new(),
            next_events: Vec::new(),
            error_message: Some(message.into()),
        }
    }

    pub fn aborted() -> Self {
        Self {
            status: NodeStatus::Aborted,
            result: serde_json::Value::Null,
            ui_schema: None,
            artifacts: BTreeMap::new(),
            next_events: Vec::new(),
            error_message: None,
        }
    }

    pub fn with_ui(mut self, ui_schema: serde_json::Value) -> Self {
        self.ui_schema = Some(ui_schema);
        self
    }

    pub fn with_artifact(mut self, id: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(id.into(), value);
        self
    }

    /// A stable digest of the result body, stored on the idempotency row.
    pub fn digest(&self) -> String {
        let body = serde_json::to_string(&self.result).unwrap_or_default();
        // FNV-1a; collision resistance is not required, only change detection.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in body.as_bytes() {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x100_0000_01b3);
        }
        format!("{hash:016x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_builtin_ref() {
        let r = NodeRef::parse("builtin://search").unwrap();
        assert_eq!(r, NodeRef::Builtin("search".into()));
        assert_eq!(r.to_string(), "builtin://search");
    }

    #[test]
    fn parses_webhook_ref() {
        let r = NodeRef::parse("https://hooks.example.com/quote").unwrap();
        assert_eq!(r, NodeRef::Webhook("https://hooks.example.com/quote".into()));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(NodeRef::parse("ftp://x").is_err());
        assert!(NodeRef::parse("builtin://").is_err());
        assert!(NodeRef::parse("search").is_err());
    }

    #[test]
    fn result_digest_is_stable_and_content_sensitive() {
        let a = NodeResult::success(serde_json::json!({"rows": 3}));
        let b = NodeResult::success(serde_json::json!({"rows": 3}));
        let c = NodeResult::success(serde_json::json!({"rows": 4}));
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn callback_body_round_trips() {
        let json = serde_json::json!({
            "status": "success",
            "result": {"total": 12},
            "artifacts": {"quotation_result": {"total": 12}},
            "next_events": ["STEP_DONE"],
        });
        let r: NodeResult = serde_json::from_value(json).unwrap();
        assert_eq!(r.status, NodeStatus::Success);
        assert!(r.artifacts.contains_key("quotation_result"));
        assert_eq!(r.next_events, vec!["STEP_DONE"]);
    }
}
