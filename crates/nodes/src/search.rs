//! Web search through the LLM provider's search endpoint.

use std::sync::Arc;

use ms_clients::LlmClient;
use ms_domain::error::Result;
use ms_domain::node::NodeResult;
use ms_kernel::{BuiltinNode, NodeContext};

const DEFAULT_TOP_K: usize = 10;

pub struct SearchNode {
    llm: Arc<dyn LlmClient>,
}

impl SearchNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl BuiltinNode for SearchNode {
    fn id(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web and collect result snippets for later steps"
    }

    fn param_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "search query" },
                "top_k": { "type": "integer", "minimum": 1, "maximum": 50 },
                "artifact_id": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult> {
        if ctx.aborted() {
            return Ok(NodeResult::aborted());
        }

        let query = match ctx.params.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.to_owned(),
            _ => {
                // Fall back to the last query this session searched.
                match ctx
                    .blackboard
                    .get(&ctx.session_id, "last_search_query")
                    .and_then(|v| v.as_str().map(str::to_owned))
                {
                    Some(q) => q,
                    None => return Ok(NodeResult::error("search: missing query")),
                }
            }
        };
        let top_k = ctx
            .params
            .get("top_k")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TOP_K as u64) as usize;

        let hits = match self.llm.search(&query, top_k).await {
            Ok(hits) => hits,
            Err(e) => return Ok(NodeResult::error(format!("search failed: {e}"))),
        };
        if ctx.aborted() {
            return Ok(NodeResult::aborted());
        }

        ctx.blackboard.set(
            &ctx.session_id,
            "last_search_query",
            serde_json::json!(query),
        );

        let artifact_id = ctx
            .params
            .get("artifact_id")
            .and_then(|v| v.as_str())
            .unwrap_or("search_result")
            .to_owned();
        let rows: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| serde_json::json!([h.title, h.url, h.snippet]))
            .collect();

        Ok(
            NodeResult::success(serde_json::json!({ "query": query, "hits": hits.len() }))
                .with_artifact(artifact_id, serde_json::to_value(&hits)?)
                .with_ui(serde_json::json!({
                    "component": "smart_table",
                    "title": format!("Search: {query}"),
                    "render_mode": "replace",
                    "data": {
                        "columns": ["title", "url", "snippet"],
                        "rows": rows,
                    },
                    "actions": [
                        { "id": "refine", "label": "Refine search", "event": "USER_MODIFY" }
                    ],
                })),
        )
    }
}
