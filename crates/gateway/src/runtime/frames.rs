//! The SSE frame vocabulary of `/api/agent/chat`.
//!
//! Ordering contract: exactly one `session_init` opens every response,
//! exactly one `done` closes it (after `error`, if any), no `message`
//! frame follows `done`, and `seq` per `message_id` is strictly
//! monotonic from 1. The controller emits frames in this vocabulary;
//! the SSE writer serializes them verbatim.

use serde_json::Value;

use ms_domain::error::ErrorCode;
use ms_domain::ui::UiRender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingPhase {
    Plan,
    Tool,
    Summarize,
    Finalize,
}

impl ThinkingPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Tool => "tool",
            Self::Summarize => "summarize",
            Self::Finalize => "finalize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Running,
    Success,
    Failed,
}

impl StepStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChatFrame {
    SessionInit {
        session_id: String,
    },
    Thinking {
        content: String,
        phase: ThinkingPhase,
        status: StepStatus,
        progress: u8,
        run_id: Option<String>,
        step: Option<String>,
    },
    ToolStart {
        run_id: String,
        tool: String,
        title: String,
    },
    ToolDone {
        run_id: String,
        tool: String,
        title: String,
        status: StepStatus,
    },
    UiRender(UiRender),
    Message {
        message_id: String,
        seq: u64,
        /// `delta` frames concatenate; `full` replaces.
        mode: &'static str,
        content: String,
    },
    Ping {
        ts: i64,
    },
    Error {
        code: ErrorCode,
        message: String,
        trace_id: String,
    },
    Done {
        session_id: String,
    },
}

impl ChatFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionInit { .. } => "session_init",
            Self::Thinking { .. } => "thinking",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolDone { .. } => "tool_done",
            Self::UiRender(_) => "ui_render",
            Self::Message { .. } => "message",
            Self::Ping { .. } => "ping",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            Self::SessionInit { session_id } => serde_json::json!({ "session_id": session_id }),
            Self::Thinking {
                content,
                phase,
                status,
                progress,
                run_id,
                step,
            } => serde_json::json!({
                "content": content,
                "phase": phase.as_str(),
                "status": status.as_str(),
                "progress": progress,
                "run_id": run_id,
                "step": step,
            }),
            Self::ToolStart { run_id, tool, title } => serde_json::json!({
                "run_id": run_id,
                "tool": tool,
                "title": title,
                "status": "running",
                "progress": 0,
            }),
            // progress pins to 100 on both outcomes so client animations
            // complete symmetrically.
            Self::ToolDone {
                run_id,
                tool,
                title,
                status,
            } => serde_json::json!({
                "run_id": run_id,
                "tool": tool,
                "title": title,
                "status": status.as_str(),
                "progress": 100,
            }),
            Self::UiRender(ui) => serde_json::to_value(ui).unwrap_or(Value::Null),
            Self::Message {
                message_id,
                seq,
                mode,
                content,
            } => serde_json::json!({
                "message_id": message_id,
                "seq": seq,
                "mode": mode,
                "role": "assistant",
                "content": content,
            }),
            Self::Ping { ts } => serde_json::json!({ "ts": ts }),
            Self::Error {
                code,
                message,
                trace_id,
            } => serde_json::json!({
                "code": code,
                "message": message,
                "retryable": code.retryable(),
                "trace_id": trace_id,
            }),
            Self::Done { session_id } => serde_json::json!({ "session_id": session_id }),
        }
    }
}

/// Seq allocator for one assistant message. `seq` starts at 1 and is
/// strictly monotonic per message id.
pub struct MessageCursor {
    message_id: String,
    next_seq: u64,
}

impl MessageCursor {
    pub fn new() -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            next_seq: 1,
        }
    }

    pub fn delta(&mut self, content: impl Into<String>) -> ChatFrame {
        let seq = self.next_seq;
        self.next_seq += 1;
        ChatFrame::Message {
            message_id: self.message_id.clone(),
            seq,
            mode: "delta",
            content: content.into(),
        }
    }

    pub fn full(&mut self, content: impl Into<String>) -> ChatFrame {
        let seq = self.next_seq;
        self.next_seq += 1;
        ChatFrame::Message {
            message_id: self.message_id.clone(),
            seq,
            mode: "full",
            content: content.into(),
        }
    }
}

impl Default for MessageCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_done_progress_is_always_100() {
        for status in [StepStatus::Success, StepStatus::Failed] {
            let frame = ChatFrame::ToolDone {
                run_id: "r".into(),
                tool: "search".into(),
                title: "Search".into(),
                status,
            };
            assert_eq!(frame.data()["progress"], 100);
        }
    }

    #[test]
    fn message_cursor_seq_is_strictly_monotonic_from_one() {
        let mut cursor = MessageCursor::new();
        let frames = [cursor.delta("a"), cursor.delta("b"), cursor.full("ab")];
        let seqs: Vec<u64> = frames
            .iter()
            .map(|f| f.data()["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        // All frames belong to the same message id.
        let ids: Vec<String> = frames
            .iter()
            .map(|f| f.data()["message_id"].as_str().unwrap().to_owned())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn error_frame_carries_retryability_and_trace() {
        let frame = ChatFrame::Error {
            code: ErrorCode::UpstreamError,
            message: "llm 502".into(),
            trace_id: "tr-1".into(),
        };
        let data = frame.data();
        assert_eq!(data["code"], "UPSTREAM_ERROR");
        assert_eq!(data["retryable"], true);
        assert_eq!(data["trace_id"], "tr-1");

        let fatal = ChatFrame::Error {
            code: ErrorCode::InternalError,
            message: "boom".into(),
            trace_id: "tr-2".into(),
        };
        assert_eq!(fatal.data()["retryable"], false);
    }

    #[test]
    fn event_names_match_protocol() {
        assert_eq!(
            ChatFrame::SessionInit {
                session_id: "s".into()
            }
            .event_name(),
            "session_init"
        );
        assert_eq!(ChatFrame::Ping { ts: 0 }.event_name(), "ping");
        assert_eq!(
            ChatFrame::Done {
                session_id: "s".into()
            }
            .event_name(),
            "done"
        );
    }
}
