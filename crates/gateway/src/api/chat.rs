//! `POST /api/agent/chat` — the streaming chat endpoint.
//!
//! Errors before the stream starts surface as HTTP error responses;
//! once streaming, failures arrive as an `error` frame followed by
//! `done` while the HTTP status stays 200.

use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use ms_domain::error::Error;

use crate::metrics::Metrics;
use crate::runtime::{run_turn, sse, IncomingMessage, TurnInput};
use crate::state::AppState;

use super::tenant::TenantContext;
use super::ApiError;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Resume an existing session; a fresh one is created when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub messages: Vec<IncomingMessage>,
    /// Free-form page context forwarded to the planner.
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

pub async fn chat(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reject = |e: Error| ApiError::new(e, ctx.trace_id.clone());

    let user_id = ctx.require_user().map_err(reject)?.to_owned();
    if body.messages.is_empty() {
        return Err(reject(Error::BadRequest("messages must not be empty".into())));
    }

    // Admission control before any session work.
    let permit = state.limits.try_acquire(&ctx.tenant_id).map_err(reject)?;

    // Resolve or create the session. A supplied id must exist and must
    // belong to the calling tenant.
    let session_id = match &body.session_id {
        Some(id) => {
            let record = state
                .sessions
                .get(id)
                .ok_or_else(|| reject(Error::SessionNotFound(id.clone())))?;
            if record.tenant_id != ctx.tenant_id {
                return Err(reject(Error::Forbidden(format!(
                    "session {id} belongs to another tenant"
                ))));
            }
            // Rehydrate if the tempo clock parked it.
            state
                .sessions
                .load_live(id)
                .map_err(reject)?
                .0
                .session_id
        }
        None => {
            let record = state
                .sessions
                .start_flow(
                    &ctx.tenant_id,
                    "chat",
                    serde_json::json!({ "user_id": user_id }),
                    &ctx.trace_id,
                )
                .map_err(reject)?;
            Metrics::incr(&state.metrics.sessions_started);
            record.session_id
        }
    };

    let heartbeat = Duration::from_secs(state.config.chat.heartbeat_secs);
    let input = TurnInput {
        tenant_id: ctx.tenant_id,
        user_id,
        trace_id: ctx.trace_id,
        session_id,
        messages: body.messages,
        page_context: body.context,
    };

    let rx = run_turn(state, input, permit);
    Ok(sse::sse_response(rx, heartbeat))
}
