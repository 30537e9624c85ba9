//! Semantic query over documents the data service has ingested.

use std::sync::Arc;

use ms_clients::DataService;
use ms_domain::error::Result;
use ms_domain::node::NodeResult;
use ms_kernel::{BuiltinNode, NodeContext};

pub struct DataQueryNode {
    data: Arc<dyn DataService>,
}

impl DataQueryNode {
    pub fn new(data: Arc<dyn DataService>) -> Self {
        Self { data }
    }
}

#[async_trait::async_trait]
impl BuiltinNode for DataQueryNode {
    fn id(&self) -> &str {
        "data_query"
    }

    fn description(&self) -> &str {
        "Run a semantic query over documents already parsed for this session"
    }

    fn param_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "document_ids": { "type": "array", "items": { "type": "string" } },
                "top_k": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult> {
        if ctx.aborted() {
            return Ok(NodeResult::aborted());
        }
        let Some(query) = ctx
            .params
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
        else {
            return Ok(NodeResult::error("data_query: missing query"));
        };

        // Default scope: documents this session parsed earlier.
        let document_ids: Vec<String> = match ctx.params.get("document_ids") {
            Some(serde_json::Value::Array(ids)) => ids
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => ctx
                .blackboard
                .get(&ctx.session_id, "parsed_document_ids")
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        };
        let top_k = ctx
            .params
            .get("top_k")
            .and_then(|v| v.as_u64())
            .unwrap_or(10) as usize;

        let answer = match self.data.semantic_query(query, &document_ids, top_k).await {
            Ok(a) => a,
            Err(e) => return Ok(NodeResult::error(format!("data_query failed: {e}"))),
        };
        if ctx.aborted() {
            return Ok(NodeResult::aborted());
        }

        Ok(NodeResult::success(serde_json::json!({
            "query": query,
            "documents": document_ids.len(),
        }))
        .with_artifact("data_query_result", answer.clone())
        .with_ui(serde_json::json!({
            "component": "chart_report",
            "title": format!("Query: {query}"),
            "render_mode": "replace",
            "data": answer,
            "actions": [
                { "id": "export", "label": "Export", "event": "USER_CONFIRM" }
            ],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_domain::node::NodeStatus;
    use ms_store::blackboard::Blackboard;
    use std::time::Duration;

    struct FakeData;

    #[async_trait::async_trait]
    impl DataService for FakeData {
        async fn parse_document(
            &self,
            _url: &str,
            _deadline: Duration,
        ) -> Result<ms_clients::ParsedDocument> {
            unreachable!("not used")
        }
        async fn semantic_query(
            &self,
            query: &str,
            document_ids: &[String],
            _top_k: usize,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({
                "query": query,
                "scoped": document_ids,
                "metrics": [{"name": "revenue", "value": 10}, {"name": "cost", "value": 4}],
            }))
        }
    }

    #[tokio::test]
    async fn scopes_to_session_documents_by_default() {
        let board = Arc::new(Blackboard::new(Duration::from_secs(60)));
        board.set(
            "s1",
            "parsed_document_ids",
            serde_json::json!(["doc-1", "doc-2"]),
        );
        let node = DataQueryNode::new(Arc::new(FakeData));
        let result = node
            .execute(NodeContext {
                tenant_id: "t1".into(),
                session_id: "s1".into(),
                step: "query".into(),
                params: serde_json::json!({"query": "total revenue"}),
                trace_id: "tr".into(),
                blackboard: board,
            })
            .await
            .unwrap();

        assert_eq!(result.status, NodeStatus::Success);
        assert_eq!(result.result["documents"], 2);
        let ui = result.ui_schema.unwrap();
        assert_eq!(ui["component"], "chart_report");
        assert_eq!(ui["data"]["metrics"].as_array().unwrap().len(), 2);
    }
}
