//! The turn loop behind `/api/agent/chat` — think, call tools, respond.
//!
//! [`run_turn`] spawns the loop and returns a channel of
//! [`ChatFrame`]s for the SSE writer. The loop guarantees the frame
//! protocol: one `session_init` up front, one `done` at the very end
//! (after `error` if the turn failed), and no `message` frame after
//! `done`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ms_clients::{ChatMessage, ChatStreamRequest, LlmEvent, ToolSpec};
use ms_domain::error::{Error, Result};
use ms_domain::node::NodeStatus;
use ms_domain::trace::TraceEvent;
use ms_domain::ui::UiRender;
use ms_kernel::DispatchOutcome;
use ms_store::repo::Snapshot;

use crate::metrics::Metrics;
use crate::state::AppState;

use super::frames::{ChatFrame, MessageCursor, StepStatus, ThinkingPhase};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes (shared with the chat handler)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub files: Vec<FileRef>,
}

pub struct TurnInput {
    pub tenant_id: String,
    pub user_id: String,
    pub trace_id: String,
    pub session_id: String,
    pub messages: Vec<IncomingMessage>,
    pub page_context: Option<Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawn the turn task. The returned channel yields protocol frames in
/// emission order; the permit (tenant admission) is released when the
/// turn finishes.
///
/// The channel buffers a single frame, so client backpressure reaches
/// the sender immediately. A client that stalls a write past the
/// configured deadline gets the response aborted with the session left
/// in its current state; a closed connection cancels the task after
/// the disconnect grace, leaving room for a final `done` attempt.
pub fn run_turn(
    state: AppState,
    input: TurnInput,
    permit: tokio::sync::OwnedSemaphorePermit,
) -> mpsc::Receiver<ChatFrame> {
    let (tx, rx) = mpsc::channel::<ChatFrame>(1);
    let sender = FrameSender {
        tx,
        metrics: state.metrics.clone(),
        write_deadline: Duration::from_secs(state.config.chat.write_deadline_secs),
        disconnect_grace: Duration::from_secs(state.config.chat.disconnect_grace_secs),
        cancel: CancellationToken::new(),
        grace_started: AtomicBool::new(false),
    };

    tokio::spawn(async move {
        let _permit = permit;
        let session_id = input.session_id.clone();

        sender
            .send(ChatFrame::SessionInit {
                session_id: session_id.clone(),
            })
            .await;

        let cancelled = sender.cancel.clone();
        let result = tokio::select! {
            r = run_turn_inner(&state, &input, &sender) => Some(r),
            () = cancelled.cancelled() => None,
        };

        match result {
            Some(result) => {
                if let Err(e) = &result {
                    tracing::warn!(
                        session_id = %session_id,
                        trace_id = %input.trace_id,
                        error = %e,
                        "chat turn failed"
                    );
                    sender
                        .send(ChatFrame::Error {
                            code: e.code(),
                            message: e.to_string(),
                            trace_id: input.trace_id.clone(),
                        })
                        .await;
                }
                sender
                    .send(ChatFrame::Done {
                        session_id: session_id.clone(),
                    })
                    .await;
            }
            None => {
                // Stalled or vanished client: the response is aborted
                // and the session stays where it was, to be resumed by
                // a new request. One last `done` attempt, without
                // waiting on backpressure.
                tracing::info!(
                    session_id = %session_id,
                    trace_id = %input.trace_id,
                    "response task cancelled"
                );
                let _ = sender.tx.try_send(ChatFrame::Done {
                    session_id: session_id.clone(),
                });
            }
        }
    });

    rx
}

/// Frame channel wrapper enforcing the transport contract: counts
/// frames, applies the per-frame write deadline, and turns a vanished
/// receiver into grace-then-cancel. Dispatcher side effects are
/// durable either way.
struct FrameSender {
    tx: mpsc::Sender<ChatFrame>,
    metrics: Arc<Metrics>,
    write_deadline: Duration,
    disconnect_grace: Duration,
    /// Cancels the turn task; fired directly on a write-deadline stall,
    /// and after the grace window on disconnect.
    cancel: CancellationToken,
    grace_started: AtomicBool,
}

impl FrameSender {
    async fn send(&self, frame: ChatFrame) {
        if self.cancel.is_cancelled() {
            return;
        }
        Metrics::incr(&self.metrics.frames_sent);
        match tokio::time::timeout(self.write_deadline, self.tx.send(frame)).await {
            Ok(Ok(())) => {}
            // Receiver gone: the client closed the connection.
            Ok(Err(_)) => self.start_disconnect_grace(),
            // Receiver alive but not draining: the client is stalled
            // past the write deadline.
            Err(_elapsed) => {
                tracing::warn!(
                    deadline = ?self.write_deadline,
                    "sse frame write exceeded deadline, aborting response"
                );
                self.cancel.cancel();
            }
        }
    }

    /// Cancel the turn task once the disconnect grace elapses; until
    /// then it may finish its current step and attempt a final `done`.
    fn start_disconnect_grace(&self) {
        if self.grace_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            grace = ?self.disconnect_grace,
            "client disconnected, starting grace window"
        );
        let cancel = self.cancel.clone();
        let grace = self.disconnect_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            cancel.cancel();
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: &AppState,
    input: &TurnInput,
    sender: &FrameSender,
) -> Result<()> {
    Metrics::incr(&state.metrics.chat_turns);
    let session_id = &input.session_id;

    let last_user = input
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .ok_or_else(|| Error::BadRequest("messages must contain a user message".into()))?
        .clone();
    if last_user.content.trim().is_empty() && last_user.files.is_empty() {
        return Err(Error::BadRequest(
            "last user message has neither content nor files".into(),
        ));
    }

    // Prior turns, preserved across responses (and TTL parking).
    let mut history: Vec<Value> = state
        .snapshots
        .get(session_id)
        .map(|s| s.chat_history)
        .unwrap_or_default();
    let turn_seq = history
        .iter()
        .filter(|m| m["role"] == "user")
        .count();

    // ── File attachments: parse before the first LLM call ──────────
    let mut file_notes: Vec<String> = Vec::new();
    for file in &last_user.files {
        sender
            .send(ChatFrame::Thinking {
                content: format!("Parsing {}", file.name),
                phase: ThinkingPhase::Tool,
                status: StepStatus::Running,
                progress: 0,
                run_id: None,
                step: Some("file_parser".into()),
            })
            .await;

        let step_key = format!("file_parser:{}", file.url);
        let params = serde_json::json!({
            "url": file.url,
            "name": file.name,
            "deadline_secs": state.config.data_service.parse_timeout_secs,
        });
        let outcome = state
            .dispatcher
            .execute_tool(session_id, "file_parser", &step_key, params)
            .await;

        let (note, status) = match outcome {
            Ok(DispatchOutcome::Executed { result, .. })
                if result.status == NodeStatus::Success =>
            {
                (
                    format!(
                        "File {} parsed: {} characters available for querying.",
                        file.name, result.result["chars"]
                    ),
                    StepStatus::Success,
                )
            }
            Ok(DispatchOutcome::SkippedIdempotent { .. }) => (
                format!("File {} was already parsed for this session.", file.name),
                StepStatus::Success,
            ),
            Ok(DispatchOutcome::Aborted) => {
                return Err(Error::Internal("session aborted".into()))
            }
            // Timeouts and parse failures downgrade to a notice — the
            // turn continues rather than hanging.
            _ => (
                format!(
                    "File {} could not be parsed in time; continue without its contents.",
                    file.name
                ),
                StepStatus::Failed,
            ),
        };
        file_notes.push(note);
        sender
            .send(ChatFrame::Thinking {
                content: format!("Parsing {}", file.name),
                phase: ThinkingPhase::Tool,
                status,
                progress: 100,
                run_id: None,
                step: Some("file_parser".into()),
            })
            .await;
    }

    // ── Assemble the LLM conversation ───────────────────────────────
    let tools: Vec<ToolSpec> = state
        .registry
        .tool_listing()
        .into_iter()
        .map(|(name, description, parameters)| ToolSpec {
            name,
            description,
            parameters,
        })
        .collect();

    let mut messages: Vec<ChatMessage> = Vec::new();
    messages.push(ChatMessage::system(system_prompt(&tools)));
    for entry in &history {
        let role = entry["role"].as_str().unwrap_or("user");
        let content = entry["content"].as_str().unwrap_or_default();
        messages.push(ChatMessage {
            role: role.to_owned(),
            content: content.to_owned(),
            call_id: None,
        });
    }
    for m in &input.messages {
        messages.push(ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
            call_id: None,
        });
    }
    if !file_notes.is_empty() {
        messages.push(ChatMessage::system(file_notes.join("\n")));
    }
    if let Some(context) = &input.page_context {
        messages.push(ChatMessage::system(format!("Page context: {context}")));
    }

    // ── Think / call-tool / respond ─────────────────────────────────
    let max_loops = state.config.chat.max_tool_loops;
    let mut tool_summaries: Vec<Value> = Vec::new();
    let mut tool_calls_total: u32 = 0;

    for loop_idx in 0..max_loops {
        if state.hardstop.is_aborted(&input.tenant_id, session_id) {
            return Err(Error::Internal("session aborted".into()));
        }

        sender
            .send(ChatFrame::Thinking {
                content: if loop_idx == 0 {
                    "Planning".into()
                } else {
                    "Reviewing tool results".into()
                },
                phase: ThinkingPhase::Plan,
                status: StepStatus::Running,
                progress: ((loop_idx * 100) / max_loops.max(1)) as u8,
                run_id: None,
                step: None,
            })
            .await;

        let request = ChatStreamRequest {
            messages: messages.clone(),
            tools: tools.clone(),
            model: None,
            temperature: Some(0.2),
        };
        let mut stream = state.llm.chat_stream(request).await?;

        let mut cursor = MessageCursor::new();
        let mut text_buf = String::new();
        let mut pending_calls: Vec<(String, String, Value)> = Vec::new();

        while let Some(event) = stream.next().await {
            if state.hardstop.is_aborted(&input.tenant_id, session_id) {
                return Err(Error::Internal("session aborted".into()));
            }
            match event? {
                LlmEvent::Token { text } => {
                    text_buf.push_str(&text);
                    sender.send(cursor.delta(text)).await;
                }
                LlmEvent::ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                } => pending_calls.push((call_id, tool_name, arguments)),
                LlmEvent::Done { .. } => break,
                LlmEvent::Error { message } => {
                    return Err(Error::Upstream {
                        service: "llm".into(),
                        message,
                    })
                }
            }
        }

        if pending_calls.is_empty() {
            // Direct reply: the streamed deltas are the answer.
            for m in &input.messages {
                history.push(serde_json::json!({ "role": m.role, "content": m.content }));
            }
            history.push(serde_json::json!({ "role": "assistant", "content": text_buf }));
            persist_history(state, session_id, history, tool_summaries);
            sender
                .send(ChatFrame::Thinking {
                    content: "Done".into(),
                    phase: ThinkingPhase::Finalize,
                    status: StepStatus::Success,
                    progress: 100,
                    run_id: None,
                    step: None,
                })
                .await;
            TraceEvent::ChatTurnFinished {
                tenant_id: input.tenant_id.clone(),
                session_id: session_id.clone(),
                tool_calls: tool_calls_total,
                frames: 0,
            }
            .emit();
            return Ok(());
        }

        // The model spoke and called tools: keep the prose as context.
        messages.push(ChatMessage::assistant(text_buf.clone()));

        for (idx, (call_id, tool_name, arguments)) in pending_calls.into_iter().enumerate() {
            tool_calls_total += 1;
            Metrics::incr(&state.metrics.tools_dispatched);

            let run_id = uuid::Uuid::new_v4().to_string();
            let title = tool_title(&tool_name);
            sender
                .send(ChatFrame::ToolStart {
                    run_id: run_id.clone(),
                    tool: tool_name.clone(),
                    title: title.clone(),
                })
                .await;

            // Deterministic step key: the same conversation replayed
            // (SSE reconnect) maps to the same key, so the idempotency
            // log blocks duplicate side effects.
            let step_key = format!("{tool_name}:{turn_seq}:{loop_idx}:{idx}");
            let outcome = state
                .dispatcher
                .execute_tool(session_id, &tool_name, &step_key, arguments)
                .await;

            let (summary, ui_schema, ok) = match outcome {
                Ok(DispatchOutcome::Executed { result, .. }) => {
                    let ok = result.status == NodeStatus::Success;
                    let summary = if ok {
                        result.result.clone()
                    } else {
                        serde_json::json!({
                            "error": result.error_message.clone().unwrap_or_default()
                        })
                    };
                    (summary, result.ui_schema.clone(), ok)
                }
                Ok(DispatchOutcome::SkippedIdempotent { prior, .. }) => {
                    let payload = prior.map(|e| e.payload).unwrap_or(Value::Null);
                    (
                        payload["result"].clone(),
                        payload.get("ui_schema").cloned().filter(|v| !v.is_null()),
                        true,
                    )
                }
                Ok(DispatchOutcome::Aborted) => {
                    return Err(Error::Internal("session aborted".into()))
                }
                Ok(other) => (
                    serde_json::json!({ "outcome": format!("{other:?}") }),
                    None,
                    true,
                ),
                Err(e) => (serde_json::json!({ "error": e.to_string() }), None, false),
            };

            if let Some(raw) = &ui_schema {
                sender
                    .send(ChatFrame::UiRender(UiRender::normalize(raw, &run_id)))
                    .await;
            }
            sender
                .send(ChatFrame::ToolDone {
                    run_id,
                    tool: tool_name.clone(),
                    title,
                    status: if ok {
                        StepStatus::Success
                    } else {
                        StepStatus::Failed
                    },
                })
                .await;

            let rendered = summary.to_string();
            tool_summaries.push(serde_json::json!({
                "tool": tool_name,
                "step": step_key,
                "ok": ok,
                "result": summary,
            }));
            messages.push(ChatMessage::tool(call_id, rendered));
        }
    }

    // Loop budget exhausted without a final answer.
    persist_history(state, session_id, history, tool_summaries);
    Err(Error::Internal(format!(
        "tool loop limit reached ({max_loops} iterations)"
    )))
}

fn persist_history(
    state: &AppState,
    session_id: &str,
    chat_history: Vec<Value>,
    tool_summaries: Vec<Value>,
) {
    let blackboard = state.blackboard.export(session_id);
    let routed_scene = blackboard
        .fields
        .get("routed_scene")
        .and_then(|v| v.as_str().map(str::to_owned));
    let chat_summary = state
        .snapshots
        .get(session_id)
        .map(|s| s.chat_summary)
        .unwrap_or_default();
    state.snapshots.save(Snapshot {
        session_id: session_id.to_owned(),
        chat_history,
        blackboard,
        tool_results: Value::Array(tool_summaries),
        chat_summary,
        routed_scene,
        saved_at: chrono::Utc::now(),
    });
}

fn system_prompt(tools: &[ToolSpec]) -> String {
    let mut prompt = String::from(
        "You are an assistant that coordinates workflow tools. Call a tool \
         when a request needs retrieval, document drafting, data queries, \
         or file contents; answer directly otherwise. Keep answers concise.\n\
         Available tools:\n",
    );
    for tool in tools {
        prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    prompt
}

fn tool_title(tool: &str) -> String {
    match tool {
        "search" => "Web search".into(),
        "doc_writer" => "Document draft".into(),
        "data_query" => "Data query".into(),
        "file_parser" => "File parsing".into(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_titles_cover_builtins() {
        assert_eq!(tool_title("search"), "Web search");
        assert_eq!(tool_title("custom_node"), "custom_node");
    }

    #[test]
    fn system_prompt_lists_tools() {
        let prompt = system_prompt(&[ToolSpec {
            name: "search".into(),
            description: "find things".into(),
            parameters: serde_json::json!({}),
        }]);
        assert!(prompt.contains("- search: find things"));
    }

    fn sender(
        tx: mpsc::Sender<ChatFrame>,
        deadline_ms: u64,
        grace_ms: u64,
    ) -> FrameSender {
        FrameSender {
            tx,
            metrics: Arc::new(Metrics::default()),
            write_deadline: Duration::from_millis(deadline_ms),
            disconnect_grace: Duration::from_millis(grace_ms),
            cancel: CancellationToken::new(),
            grace_started: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn healthy_client_does_not_cancel() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = sender(tx, 50, 50);
        sender.send(ChatFrame::Ping { ts: 0 }).await;
        assert!(rx.recv().await.is_some());
        assert!(!sender.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn stalled_client_trips_the_write_deadline() {
        // Hold the receiver open but never read: the single-frame
        // buffer fills and the second write stalls.
        let (tx, _rx) = mpsc::channel(1);
        let sender = sender(tx, 20, 1000);
        sender.send(ChatFrame::Ping { ts: 0 }).await;
        assert!(!sender.cancel.is_cancelled());
        sender.send(ChatFrame::Ping { ts: 1 }).await;
        assert!(sender.cancel.is_cancelled());
        // Once aborted, further sends are dropped without blocking.
        sender.send(ChatFrame::Ping { ts: 2 }).await;
    }

    #[tokio::test]
    async fn disconnect_grants_grace_before_cancelling() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = sender(tx, 50, 40);
        sender.send(ChatFrame::Ping { ts: 0 }).await;
        // Inside the grace window the task is still allowed to run.
        assert!(!sender.cancel.is_cancelled());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(sender.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn repeated_disconnect_sends_start_one_grace_timer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = sender(tx, 50, 40);
        sender.send(ChatFrame::Ping { ts: 0 }).await;
        sender.send(ChatFrame::Ping { ts: 1 }).await;
        assert!(sender.grace_started.load(Ordering::SeqCst));
        assert!(!sender.cancel.is_cancelled());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(sender.cancel.is_cancelled());
    }
}
