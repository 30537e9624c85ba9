//! Document drafting: comparisons, quotations, contracts, delivery
//! notes, reports. Streams the LLM output so the abort signal is
//! honoured between chunks.

use std::sync::Arc;

use futures_util::StreamExt;

use ms_clients::{ChatMessage, ChatStreamRequest, LlmClient, LlmEvent};
use ms_domain::error::Result;
use ms_domain::node::NodeResult;
use ms_kernel::{BuiltinNode, NodeContext};

/// Document kinds with a fixed artifact identifier.
const KNOWN_DOC_TYPES: &[&str] = &[
    "comparison",
    "quotation",
    "contract",
    "delivery_note",
    "report",
];

pub struct DocWriterNode {
    llm: Arc<dyn LlmClient>,
}

impl DocWriterNode {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Collect the session's artifacts into a context block for the
    /// prompt, capped so a large session cannot blow the request.
    fn context_block(ctx: &NodeContext) -> String {
        const PER_ARTIFACT_CAP: usize = 4000;
        let mut block = String::new();
        for id in ctx.blackboard.list_artifacts(&ctx.session_id) {
            if let Some(value) = ctx.blackboard.read_artifact(&ctx.session_id, &id) {
                let mut rendered = value.to_string();
                if rendered.len() > PER_ARTIFACT_CAP {
                    rendered.truncate(PER_ARTIFACT_CAP);
                }
                block.push_str(&format!("## {id}\n{rendered}\n"));
            }
        }
        block
    }
}

#[async_trait::async_trait]
impl BuiltinNode for DocWriterNode {
    fn id(&self) -> &str {
        "doc_writer"
    }

    fn description(&self) -> &str {
        "Draft a structured document (comparison, quotation, contract, delivery note, report) from the session's collected artifacts"
    }

    fn param_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "doc_type": {
                    "type": "string",
                    "enum": KNOWN_DOC_TYPES,
                },
                "instructions": { "type": "string" }
            },
            "required": ["doc_type"]
        })
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeResult> {
        if ctx.aborted() {
            return Ok(NodeResult::aborted());
        }

        let doc_type = ctx
            .params
            .get("doc_type")
            .and_then(|v| v.as_str())
            .unwrap_or("report")
            .to_owned();
        let instructions = ctx
            .params
            .get("instructions")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_owned();

        let context_block = Self::context_block(&ctx);
        let request = ChatStreamRequest {
            messages: vec![
                ChatMessage::system(format!(
                    "You draft a {doc_type} document in markdown. Use only the \
                     provided session data; be precise with figures."
                )),
                ChatMessage::user(format!(
                    "Session data:\n{context_block}\nInstructions: {instructions}"
                )),
            ],
            tools: Vec::new(),
            model: None,
            temperature: Some(0.2),
        };

        let mut stream = match self.llm.chat_stream(request).await {
            Ok(s) => s,
            Err(e) => return Ok(NodeResult::error(format!("doc_writer llm call failed: {e}"))),
        };

        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if ctx.aborted() {
                return Ok(NodeResult::aborted());
            }
            match event {
                Ok(LlmEvent::Token { text: chunk }) => text.push_str(&chunk),
                Ok(LlmEvent::Done { .. }) => break,
                Ok(LlmEvent::Error { message }) => {
                    return Ok(NodeResult::error(format!("doc_writer stream: {message}")))
                }
                Ok(LlmEvent::ToolCall { .. }) => {}
                Err(e) => return Ok(NodeResult::error(e.to_string())),
            }
        }
        if text.trim().is_empty() {
            return Ok(NodeResult::error("doc_writer produced an empty document"));
        }

        let artifact_id = format!("{doc_type}_result");
        Ok(NodeResult::success(serde_json::json!({
            "doc_type": doc_type,
            "chars": text.len(),
        }))
        .with_artifact(
            artifact_id.clone(),
            serde_json::json!({ "doc_type": doc_type, "content": text }),
        )
        .with_ui(serde_json::json!({
            "component": "document_preview",
            "title": format!("Draft {doc_type}"),
            "render_mode": "replace",
            "data": { "markdown": text, "artifact_id": artifact_id },
            "actions": [
                { "id": "confirm", "label": "Confirm", "event": "USER_CONFIRM" },
                { "id": "modify", "label": "Request changes", "event": "USER_MODIFY" }
            ],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_clients::BoxStream;
    use ms_domain::node::NodeStatus;
    use ms_store::blackboard::Blackboard;
    use std::time::Duration;

    /// Streams a fixed token sequence.
    struct ScriptedLlm {
        tokens: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_stream(
            &self,
            _req: ChatStreamRequest,
        ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
            let tokens = self.tokens.clone();
            Ok(Box::pin(async_stream::stream! {
                for t in tokens {
                    yield Ok(LlmEvent::Token { text: t.to_owned() });
                }
                yield Ok(LlmEvent::Done { finish_reason: Some("stop".into()) });
            }))
        }
        async fn search(&self, _q: &str, _k: usize) -> Result<Vec<ms_clients::SearchHit>> {
            Ok(Vec::new())
        }
        async fn embed(&self, _input: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }
    }

    fn ctx(params: serde_json::Value) -> NodeContext {
        NodeContext {
            tenant_id: "t1".into(),
            session_id: "s1".into(),
            step: "write".into(),
            params,
            trace_id: "tr".into(),
            blackboard: Arc::new(Blackboard::new(Duration::from_secs(60))),
        }
    }

    #[tokio::test]
    async fn drafts_and_names_artifact_by_doc_type() {
        let node = DocWriterNode::new(Arc::new(ScriptedLlm {
            tokens: vec!["# Quotation", "\nTotal: 42"],
        }));
        let result = node
            .execute(ctx(serde_json::json!({"doc_type": "quotation"})))
            .await
            .unwrap();

        assert_eq!(result.status, NodeStatus::Success);
        assert!(result.artifacts.contains_key("quotation_result"));
        let ui = result.ui_schema.unwrap();
        assert_eq!(ui["component"], "document_preview");
        // The panel offers confirm/modify actions for the review gate.
        assert_eq!(ui["actions"].as_array().unwrap().len(), 2);
        assert!(ui["data"]["markdown"]
            .as_str()
            .unwrap()
            .contains("Total: 42"));
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let node = DocWriterNode::new(Arc::new(ScriptedLlm { tokens: vec!["  "] }));
        let result = node
            .execute(ctx(serde_json::json!({"doc_type": "contract"})))
            .await
            .unwrap();
        assert_eq!(result.status, NodeStatus::Error);
    }
}
