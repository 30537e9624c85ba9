//! The LLM provider client: chat streaming, web search, embeddings.
//!
//! [`LlmClient`] is the seam the controller programs against; the HTTP
//! implementation speaks the provider's SSE wire format. Tests and the
//! controller's unit suite substitute scripted implementations.

use std::pin::Pin;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use ms_domain::error::{Error, Result};

use crate::sse;

pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    pub content: String,
    /// Tool-call id this message answers (role `tool` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
            call_id: None,
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            call_id: None,
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            call_id: None,
        }
    }
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            call_id: Some(call_id.into()),
        }
    }
}

/// A tool the planner may invoke, derived from the node registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool parameters.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatStreamRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Events decoded from the provider stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmEvent {
    Token {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    Done {
        #[serde(default)]
        finish_reason: Option<String>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub score: f32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Stream one chat completion.
    async fn chat_stream(
        &self,
        req: ChatStreamRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>>;

    /// Web search through the provider.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;

    /// Text embeddings.
    async fn embed(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpLlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn upstream(message: impl std::fmt::Display) -> Error {
        Error::Upstream {
            service: "llm".into(),
            message: message.to_string(),
        }
    }
}

/// Decode one SSE frame from the provider into an [`LlmEvent`].
/// Unnamed frames fall back to the payload's `type` tag; unknown frames
/// are dropped (forward compatibility).
pub(crate) fn decode_frame(event: &str, data: &str) -> Option<Result<LlmEvent>> {
    if data == "[DONE]" {
        return Some(Ok(LlmEvent::Done {
            finish_reason: Some("stop".into()),
        }));
    }
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return Some(Err(Error::Upstream {
                service: "llm".into(),
                message: format!("bad stream payload: {e}"),
            }))
        }
    };
    let tagged = if event.is_empty() {
        value
    } else {
        let mut v = value;
        if let Some(obj) = v.as_object_mut() {
            obj.insert("type".into(), serde_json::json!(event));
        }
        v
    };
    serde_json::from_value::<LlmEvent>(tagged).ok().map(Ok)
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat_stream(
        &self,
        mut req: ChatStreamRequest,
    ) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        if req.model.is_none() {
            req.model = Some(self.model.clone());
        }

        let response = self
            .request("/v1/chat/stream")
            .json(&req)
            .send()
            .await
            .map_err(Self::upstream)?;
        if !response.status().is_success() {
            return Err(Self::upstream(format!("HTTP {}", response.status())));
        }

        let frames = sse::frame_stream(response);
        let stream = async_stream::stream! {
            futures_util::pin_mut!(frames);
            let mut done = false;
            while let Some(next) = frames.next().await {
                match next {
                    Ok(frame) => {
                        if let Some(event) = decode_frame(&frame.event, &frame.data) {
                            if matches!(event, Ok(LlmEvent::Done { .. })) {
                                done = true;
                            }
                            yield event;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
            if !done {
                yield Ok(LlmEvent::Done { finish_reason: Some("stop".into()) });
            }
        };
        Ok(Box::pin(stream))
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        #[derive(Deserialize)]
        struct SearchResponse {
            hits: Vec<SearchHit>,
        }
        let response = self
            .request("/v1/search")
            .json(&serde_json::json!({ "query": query, "top_k": top_k }))
            .send()
            .await
            .map_err(Self::upstream)?;
        if !response.status().is_success() {
            return Err(Self::upstream(format!("HTTP {}", response.status())));
        }
        let body: SearchResponse = response.json().await.map_err(Self::upstream)?;
        Ok(body.hits)
    }

    async fn embed(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        #[derive(Deserialize)]
        struct EmbedResponse {
            embeddings: Vec<Vec<f32>>,
        }
        let response = self
            .request("/v1/embeddings")
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await
            .map_err(Self::upstream)?;
        if !response.status().is_success() {
            return Err(Self::upstream(format!("HTTP {}", response.status())));
        }
        let body: EmbedResponse = response.json().await.map_err(Self::upstream)?;
        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_token_frame() {
        let event = decode_frame("token", r#"{"text":"hel"}"#).unwrap().unwrap();
        assert!(matches!(event, LlmEvent::Token { text } if text == "hel"));
    }

    #[test]
    fn decodes_tool_call_frame() {
        let event = decode_frame(
            "tool_call",
            r#"{"call_id":"c1","tool_name":"search","arguments":{"query":"steel"}}"#,
        )
        .unwrap()
        .unwrap();
        let LlmEvent::ToolCall {
            call_id,
            tool_name,
            arguments,
        } = event
        else {
            panic!("expected tool call");
        };
        assert_eq!(call_id, "c1");
        assert_eq!(tool_name, "search");
        assert_eq!(arguments["query"], "steel");
    }

    #[test]
    fn decodes_self_tagged_frame_without_event_name() {
        let event = decode_frame("", r#"{"type":"token","text":"x"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(event, LlmEvent::Token { .. }));
    }

    #[test]
    fn done_sentinel() {
        let event = decode_frame("", "[DONE]").unwrap().unwrap();
        assert!(matches!(event, LlmEvent::Done { .. }));
    }

    #[test]
    fn unknown_frames_are_dropped() {
        assert!(decode_frame("usage", r#"{"tokens":12}"#).is_none());
    }

    #[test]
    fn garbage_payload_is_an_upstream_error() {
        let result = decode_frame("token", "{not json").unwrap();
        assert!(result.is_err());
    }
}
