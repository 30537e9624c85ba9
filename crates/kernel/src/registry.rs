//! Node registry — resolves `node_ref` strings to executors.
//!
//! A node is one of two variants: an in-process [`BuiltinNode`] or a
//! webhook descriptor (URL + parameter schema). The registry holds the
//! tagged variant; the dispatcher branches on the tag. Builtins are
//! registered once at startup and immutable afterwards; webhooks may be
//! registered dynamically and are upserted into the durable node table
//! so peer instances converge.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use ms_domain::error::{Error, Result};
use ms_domain::node::{NodeRef, NodeResult};
use ms_store::blackboard::{Blackboard, SIGNAL_ABORT};
use ms_store::repo::{NodeKind, NodeRegistration, NodeRepository};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builtin node contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a builtin sees for one execution.
pub struct NodeContext {
    pub tenant_id: String,
    pub session_id: String,
    /// The FSM state being executed.
    pub step: String,
    pub params: serde_json::Value,
    pub trace_id: String,
    pub blackboard: Arc<Blackboard>,
}

impl NodeContext {
    /// Cooperative cancellation: builtins poll this at suspension
    /// points and return `NodeResult::aborted()` when it turns true.
    pub fn aborted(&self) -> bool {
        self.blackboard.get_signal(&self.session_id, SIGNAL_ABORT)
    }
}

#[async_trait::async_trait]
pub trait BuiltinNode: Send + Sync {
    /// Registry id; referenced from flows as `builtin://<id>`.
    fn id(&self) -> &str;

    /// One-line description offered to the planner as a tool.
    fn description(&self) -> &str;

    /// JSON Schema of accepted params.
    fn param_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the dispatcher gets back from resolution.
#[derive(Clone)]
pub enum ResolvedNode {
    Builtin(Arc<dyn BuiltinNode>),
    Webhook {
        node_id: String,
        url: String,
        callback_secret: Option<String>,
    },
}

impl std::fmt::Debug for ResolvedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedNode::Builtin(node) => f.debug_tuple("Builtin").field(&node.id()).finish(),
            ResolvedNode::Webhook {
                node_id,
                url,
                callback_secret,
            } => f
                .debug_struct("Webhook")
                .field("node_id", node_id)
                .field("url", url)
                .field("callback_secret", callback_secret)
                .finish(),
        }
    }
}

pub struct NodeRegistry {
    builtins: RwLock<HashMap<String, Arc<dyn BuiltinNode>>>,
    repo: Arc<NodeRepository>,
}

impl NodeRegistry {
    /// Create the registry and rehydrate webhook registrations from the
    /// durable table.
    pub fn new(repo: Arc<NodeRepository>) -> Self {
        let webhook_count = repo.webhooks().len();
        if webhook_count > 0 {
            tracing::info!(webhooks = webhook_count, "node registry rehydrated");
        }
        Self {
            builtins: RwLock::new(HashMap::new()),
            repo,
        }
    }

    /// Register an in-process node. Upserts the durable row so the
    /// registry table reflects the full node population.
    pub fn register_builtin(&self, node: Arc<dyn BuiltinNode>) {
        let id = node.id().to_owned();
        self.repo.upsert(NodeRegistration {
            node_id: id.clone(),
            kind: NodeKind::Builtin,
            url: None,
            schema: Some(node.param_schema()),
            callback_secret: None,
            registered_at: Utc::now(),
        });
        tracing::info!(node_id = %id, "builtin node registered");
        self.builtins.write().insert(id, node);
    }

    /// Register a webhook node. Mints a callback secret on first
    /// registration; re-registration keeps the existing secret so
    /// in-flight callbacks stay verifiable.
    pub fn register_webhook(
        &self,
        node_id: &str,
        url: &str,
        schema: serde_json::Value,
    ) -> Result<NodeRegistration> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::BadRequest(format!(
                "webhook url must be http(s), got {url:?}"
            )));
        }
        let callback_secret = self
            .repo
            .get(node_id)
            .and_then(|existing| existing.callback_secret)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let registration = NodeRegistration {
            node_id: node_id.to_owned(),
            kind: NodeKind::Webhook,
            url: Some(url.to_owned()),
            schema: Some(schema),
            callback_secret: Some(callback_secret),
            registered_at: Utc::now(),
        };
        self.repo.upsert(registration.clone());
        tracing::info!(node_id = %node_id, url = %url, "webhook node registered");
        Ok(registration)
    }

    /// Resolve a raw `node_ref` string to an executor.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedNode> {
        match NodeRef::parse(raw)? {
            NodeRef::Builtin(id) => self
                .builtins
                .read()
                .get(&id)
                .cloned()
                .map(ResolvedNode::Builtin)
                .ok_or_else(|| Error::NodeNotFound(format!("builtin://{id}"))),
            NodeRef::Webhook(url) => {
                // A direct URL resolves even without a registration row;
                // a registered row contributes its callback secret.
                let registration = self
                    .repo
                    .webhooks()
                    .into_iter()
                    .find(|n| n.url.as_deref() == Some(url.as_str()));
                let (node_id, callback_secret) = match registration {
                    Some(r) => (r.node_id, r.callback_secret),
                    None => (url.clone(), None),
                };
                Ok(ResolvedNode::Webhook {
                    node_id,
                    url,
                    callback_secret,
                })
            }
        }
    }

    /// Resolve a webhook by its registry id (for callbacks).
    pub fn webhook_by_id(&self, node_id: &str) -> Option<NodeRegistration> {
        self.repo
            .get(node_id)
            .filter(|n| n.kind == NodeKind::Webhook)
    }

    /// Builtin nodes offered to the planner as tools:
    /// `(id, description, param_schema)`.
    pub fn tool_listing(&self) -> Vec<(String, String, serde_json::Value)> {
        let mut listing: Vec<(String, String, serde_json::Value)> = self
            .builtins
            .read()
            .values()
            .map(|n| {
                (
                    n.id().to_owned(),
                    n.description().to_owned(),
                    n.param_schema(),
                )
            })
            .collect();
        listing.sort_by(|a, b| a.0.cmp(&b.0));
        listing
    }

    /// All durable registrations (builtin + webhook), secrets redacted.
    pub fn list(&self) -> Vec<NodeRegistration> {
        self.repo
            .list()
            .into_iter()
            .map(|mut n| {
                n.callback_secret = None;
                n
            })
            .collect()
    }

    pub fn builtin_count(&self) -> usize {
        self.builtins.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoNode;

    #[async_trait::async_trait]
    impl BuiltinNode for EchoNode {
        fn id(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its params"
        }
        async fn execute(&self, ctx: NodeContext) -> Result<NodeResult> {
            Ok(NodeResult::success(ctx.params))
        }
    }

    fn registry() -> (tempfile::TempDir, NodeRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(NodeRepository::open(dir.path()).unwrap());
        (dir, NodeRegistry::new(repo))
    }

    #[tokio::test]
    async fn builtin_resolution_and_execution() {
        let (_dir, registry) = registry();
        registry.register_builtin(Arc::new(EchoNode));

        let node = registry.resolve("builtin://echo").unwrap();
        let ResolvedNode::Builtin(node) = node else {
            panic!("expected builtin");
        };
        let result = node
            .execute(NodeContext {
                tenant_id: "t1".into(),
                session_id: "s1".into(),
                step: "execute".into(),
                params: serde_json::json!({"q": "steel"}),
                trace_id: "tr".into(),
                blackboard: Arc::new(Blackboard::new(Duration::from_secs(60))),
            })
            .await
            .unwrap();
        assert_eq!(result.result["q"], "steel");
    }

    #[test]
    fn unknown_builtin_fails_resolution() {
        let (_dir, registry) = registry();
        let err = registry.resolve("builtin://ghost").unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(_)));
    }

    #[test]
    fn webhook_registration_round_trip() {
        let (_dir, registry) = registry();
        let reg = registry
            .register_webhook(
                "quote",
                "https://hooks.example.com/quote",
                serde_json::json!({"type": "object"}),
            )
            .unwrap();
        let secret = reg.callback_secret.clone().unwrap();

        // Re-registration keeps the secret stable.
        let again = registry
            .register_webhook("quote", "https://hooks.example.com/quote-v2", serde_json::json!({}))
            .unwrap();
        assert_eq!(again.callback_secret.as_deref(), Some(secret.as_str()));

        let resolved = registry.resolve("https://hooks.example.com/quote-v2").unwrap();
        let ResolvedNode::Webhook {
            node_id,
            callback_secret,
            ..
        } = resolved
        else {
            panic!("expected webhook");
        };
        assert_eq!(node_id, "quote");
        assert_eq!(callback_secret.as_deref(), Some(secret.as_str()));
    }

    #[test]
    fn unregistered_webhook_url_still_resolves() {
        let (_dir, registry) = registry();
        let resolved = registry.resolve("https://ad-hoc.example.com/run").unwrap();
        assert!(matches!(
            resolved,
            ResolvedNode::Webhook {
                callback_secret: None,
                ..
            }
        ));
    }

    #[test]
    fn list_redacts_secrets() {
        let (_dir, registry) = registry();
        registry
            .register_webhook("quote", "https://hooks.example.com/quote", serde_json::json!({}))
            .unwrap();
        assert!(registry.list().iter().all(|n| n.callback_secret.is_none()));
    }

    #[test]
    fn rejects_non_http_webhook() {
        let (_dir, registry) = registry();
        assert!(registry
            .register_webhook("bad", "ftp://x", serde_json::json!({}))
            .is_err());
    }
}
