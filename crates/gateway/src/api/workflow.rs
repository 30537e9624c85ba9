//! Workflow control plane: start, events, state, hard stop, webhook
//! callbacks, and audit replay.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use ms_domain::error::Error;
use ms_domain::node::NodeResult;
use ms_kernel::DispatchOutcome;
use ms_store::repo::SessionStatus;

use crate::metrics::Metrics;
use crate::state::AppState;

use super::tenant::TenantContext;
use super::ApiError;

type HmacSha256 = Hmac<Sha256>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/workflow/start
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub flow_id: Option<String>,
    /// Implicit single-node session; `builtin://<id>` or a node id.
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub async fn start(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reject = |e: Error| ApiError::new(e, ctx.trace_id.clone());

    let record = match (&body.flow_id, &body.node_id) {
        (Some(flow_id), None) => state
            .sessions
            .start_flow(&ctx.tenant_id, flow_id, body.params, &ctx.trace_id)
            .map_err(reject)?,
        (None, Some(node_id)) => {
            let node_ref = if node_id.contains("://") {
                node_id.clone()
            } else {
                format!("builtin://{node_id}")
            };
            state
                .sessions
                .start_single_node(&ctx.tenant_id, &node_ref, body.params, &ctx.trace_id)
                .map_err(reject)?
        }
        _ => {
            return Err(reject(Error::BadRequest(
                "exactly one of flow_id or node_id is required".into(),
            )))
        }
    };
    Metrics::incr(&state.metrics.sessions_started);

    // Initial-state execution runs in the background; the start call
    // returns immediately with the session handle.
    let dispatcher = state.dispatcher.clone();
    let session_id = record.session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.run_initial(&session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "initial dispatch failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "session_id": record.session_id,
            "flow_id": record.flow_id,
            "state": record.state,
            "status": record.status,
            "trace_id": ctx.trace_id,
        })),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/workflow/:session/event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PushEventRequest {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Originating step, for branch completions reporting into a
    /// fan-in state. Defaults to the interactive user.
    #[serde(default = "d_source")]
    pub source: String,
}

fn d_source() -> String {
    "user".into()
}

pub async fn push_event(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(session_id): Path<String>,
    Json(body): Json<PushEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    guard_tenant(&state, &ctx, &session_id)?;
    let outcome = state
        .dispatcher
        .push_event(&session_id, &body.event, body.payload, &body.source)
        .await
        .map_err(|e| ApiError::new(e, ctx.trace_id.clone()))?;

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "outcome": outcome_view(&outcome),
        "trace_id": ctx.trace_id,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/workflow/:session/state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_state(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = guard_tenant(&state, &ctx, &session_id)?;
    let allowed = state
        .flows
        .get(&record.flow_id)
        .map(|flow| {
            flow.events_from(&record.state)
                .into_iter()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(Json(serde_json::json!({
        "session_id": record.session_id,
        "flow_id": record.flow_id,
        "state": record.state,
        "status": record.status,
        "allowed_events": allowed,
        "updated_at": record.updated_at,
        "trace_id": ctx.trace_id,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /api/workflow/:session — hard stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn hard_stop(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    guard_tenant(&state, &ctx, &session_id)?;
    Metrics::incr(&state.metrics.hard_stops);

    state
        .hardstop
        .abort(&ctx.tenant_id, &session_id, "hard stop requested", &ctx.trace_id)
        .await;
    state.fsm.force(&ctx.tenant_id, &session_id, "aborted");
    state.sessions.update(&session_id, |r| {
        r.state = "aborted".into();
        r.status = SessionStatus::Aborted;
        r.completed_at = Some(chrono::Utc::now());
    });

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "status": "aborted",
        "trace_id": ctx.trace_id,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/workflow/:session/callback — webhook return channel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct CallbackBody {
    step: String,
    /// Registry id of the webhook node; enables signature checking.
    #[serde(default)]
    node_id: Option<String>,
    #[serde(flatten)]
    result: NodeResult,
}

pub async fn callback(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let reject = |e: Error| ApiError::new(e, ctx.trace_id.clone());
    guard_tenant(&state, &ctx, &session_id)?;
    Metrics::incr(&state.metrics.webhook_callbacks);

    let parsed: CallbackBody = serde_json::from_slice(&body)
        .map_err(|e| reject(Error::BadRequest(format!("invalid callback body: {e}"))))?;

    // When the node registration carries a secret, the callback must be
    // signed: `X-Callback-Signature: sha256=<hex>` over the raw body.
    if let Some(node_id) = &parsed.node_id {
        if let Some(secret) = state
            .registry
            .webhook_by_id(node_id)
            .and_then(|n| n.callback_secret)
        {
            let supplied = headers
                .get("x-callback-signature")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let supplied = supplied.strip_prefix("sha256=").unwrap_or(supplied);

            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|e| reject(Error::Internal(format!("hmac init: {e}"))))?;
            mac.update(&body);
            let computed = hex::encode(mac.finalize().into_bytes());
            if computed.as_bytes().ct_eq(supplied.as_bytes()).unwrap_u8() != 1 {
                return Err(reject(Error::Forbidden(
                    "invalid callback signature".into(),
                )));
            }
        }
    }

    let outcome = state
        .dispatcher
        .webhook_callback(&session_id, &parsed.step, parsed.result)
        .await
        .map_err(reject)?;

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "outcome": outcome_view(&outcome),
        "trace_id": ctx.trace_id,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/workflow/:session/events — audit replay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    #[serde(default)]
    pub after_tick: u64,
}

pub async fn replay(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(session_id): Path<String>,
    Query(query): Query<ReplayQuery>,
) -> Result<impl IntoResponse, ApiError> {
    guard_tenant(&state, &ctx, &session_id)?;
    let events = state.events.list_after_tick(&session_id, query.after_tick);
    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "count": events.len(),
        "events": events,
        "trace_id": ctx.trace_id,
    })))
}

// ── Shared helpers ──────────────────────────────────────────────────

fn guard_tenant(
    state: &AppState,
    ctx: &TenantContext,
    session_id: &str,
) -> Result<ms_store::repo::SessionRecord, ApiError> {
    let record = state.sessions.get(session_id).ok_or_else(|| {
        ApiError::new(
            Error::SessionNotFound(session_id.to_owned()),
            ctx.trace_id.clone(),
        )
    })?;
    if record.tenant_id != ctx.tenant_id {
        return Err(ApiError::new(
            Error::Forbidden(format!("session {session_id} belongs to another tenant")),
            ctx.trace_id.clone(),
        ));
    }
    Ok(record)
}

fn outcome_view(outcome: &DispatchOutcome) -> serde_json::Value {
    match outcome {
        DispatchOutcome::Executed { step, result } => serde_json::json!({
            "kind": "executed",
            "step": step,
            "status": result.status,
        }),
        DispatchOutcome::WebhookPending { step } => {
            serde_json::json!({ "kind": "webhook_pending", "step": step })
        }
        DispatchOutcome::WaitingUser { state } => {
            serde_json::json!({ "kind": "waiting_user", "state": state })
        }
        DispatchOutcome::FanInPending { state, missing } => serde_json::json!({
            "kind": "fan_in_pending",
            "state": state,
            "missing": missing,
        }),
        DispatchOutcome::SkippedIdempotent { step, .. } => {
            serde_json::json!({ "kind": "skipped", "step": step })
        }
        DispatchOutcome::Busy { step } => serde_json::json!({ "kind": "busy", "step": step }),
        DispatchOutcome::Terminal { state } => {
            serde_json::json!({ "kind": "terminal", "state": state })
        }
        DispatchOutcome::NoNode { state } => {
            serde_json::json!({ "kind": "idle", "state": state })
        }
        DispatchOutcome::Aborted => serde_json::json!({ "kind": "aborted" }),
    }
}
