//! File parsing through the data service. Used both as a flow node and
//! by the chat controller when messages carry uploaded files.

use std::sync::Arc;
use std::time::Duration;

use ms_clients::DataService;
use ms_domain::error::Result;
use ms_domain::node::NodeResult;
use ms_kernel::{BuiltinNode, NodeContext};

const DEFAULT_DEADLINE_SECS: u64 = 60;

pub struct FileParserNode {
    data: Arc<dyn DataService>,
}

impl FileParserNode {
    pub fn new(data: Arc<dyn DataService>) -> Self {
        Self { data }
    }
}

#[async_trait::async_trait]
impl BuiltinNode for FileParserNode {
    fn id(&self) -> &str {
        "file_parser"
    }

    fn description(&self) -> &str {
        "Parse an uploaded document (by object-store URL) into text the session can query"
    }

    fn param_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "object-store URL of the file" },
                "name": { "type": "string" },
                "deadline_secs": { "type": "integer", "minimum": 1, "maximum": 300 }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult> {
        if ctx.aborted() {
            return Ok(NodeResult::aborted());
        }
        let Some(url) = ctx
            .params
            .get("url")
            .and_then(|v| v.as_str())
            .filter(|u| !u.is_empty())
        else {
            return Ok(NodeResult::error("file_parser: missing url"));
        };
        let deadline = Duration::from_secs(
            ctx.params
                .get("deadline_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_DEADLINE_SECS),
        );

        let parsed = match self.data.parse_document(url, deadline).await {
            Ok(p) => p,
            Err(e) => return Ok(NodeResult::error(format!("file parse failed: {e}"))),
        };
        if ctx.aborted() {
            return Ok(NodeResult::aborted());
        }

        // Track the parsed id so data_query can scope to this session.
        let mut ids: Vec<String> = ctx
            .blackboard
            .get(&ctx.session_id, "parsed_document_ids")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if !ids.contains(&parsed.document_id) {
            ids.push(parsed.document_id.clone());
        }
        ctx.blackboard.set(
            &ctx.session_id,
            "parsed_document_ids",
            serde_json::to_value(&ids)?,
        );

        let name = ctx
            .params
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(url);
        let preview: String = parsed.text.chars().take(2000).collect();

        Ok(NodeResult::success(serde_json::json!({
            "document_id": parsed.document_id,
            "chars": parsed.text.len(),
            "page_count": parsed.page_count,
        }))
        .with_artifact(
            format!("parsed:{}", parsed.document_id),
            serde_json::json!({ "name": name, "text": parsed.text }),
        )
        .with_ui(serde_json::json!({
            "component": "document_preview",
            "title": format!("Parsed {name}"),
            "render_mode": "append",
            "data": { "markdown": preview },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_clients::ParsedDocument;
    use ms_domain::error::Error;
    use ms_domain::node::NodeStatus;
    use ms_store::blackboard::Blackboard;

    struct FakeData {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl DataService for FakeData {
        async fn parse_document(
            &self,
            _url: &str,
            _deadline: Duration,
        ) -> Result<ParsedDocument> {
            if self.fail {
                return Err(Error::Timeout("parse exceeded 60s".into()));
            }
            Ok(ParsedDocument {
                document_id: "doc-9".into(),
                text: "page one text".into(),
                page_count: 1,
            })
        }
        async fn semantic_query(
            &self,
            _q: &str,
            _ids: &[String],
            _k: usize,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn ctx(board: Arc<Blackboard>, params: serde_json::Value) -> NodeContext {
        NodeContext {
            tenant_id: "t1".into(),
            session_id: "s1".into(),
            step: "parse".into(),
            params,
            trace_id: "tr".into(),
            blackboard: board,
        }
    }

    #[tokio::test]
    async fn records_document_id_for_later_queries() {
        let board = Arc::new(Blackboard::new(Duration::from_secs(60)));
        let node = FileParserNode::new(Arc::new(FakeData { fail: false }));
        let result = node
            .execute(ctx(
                board.clone(),
                serde_json::json!({"url": "https://oss/x.pdf", "name": "x.pdf"}),
            ))
            .await
            .unwrap();

        assert_eq!(result.status, NodeStatus::Success);
        assert!(result.artifacts.contains_key("parsed:doc-9"));
        assert_eq!(
            board.get("s1", "parsed_document_ids"),
            Some(serde_json::json!(["doc-9"]))
        );
    }

    #[tokio::test]
    async fn timeout_becomes_a_node_error() {
        let board = Arc::new(Blackboard::new(Duration::from_secs(60)));
        let node = FileParserNode::new(Arc::new(FakeData { fail: true }));
        let result = node
            .execute(ctx(board, serde_json::json!({"url": "https://oss/x.pdf"})))
            .await
            .unwrap();
        assert_eq!(result.status, NodeStatus::Error);
        assert!(result.error_message.unwrap().contains("parse"));
    }
}
