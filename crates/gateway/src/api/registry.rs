//! Node and flow registry endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use ms_domain::error::Error;
use ms_domain::flow::FlowDefinition;

use crate::state::AppState;

use super::tenant::TenantContext;
use super::ApiError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Nodes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_nodes(
    State(state): State<AppState>,
    _ctx: TenantContext,
) -> impl IntoResponse {
    let nodes = state.registry.list();
    Json(serde_json::json!({
        "count": nodes.len(),
        "nodes": nodes,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub url: String,
    #[serde(default)]
    pub schema: serde_json::Value,
}

/// Register (or replace) a webhook node. The response includes the
/// callback secret exactly once — at registration time.
pub async fn register_node(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<RegisterNodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.node_id.trim().is_empty() {
        return Err(ApiError::new(
            Error::BadRequest("node_id must not be empty".into()),
            ctx.trace_id,
        ));
    }
    let registration = state
        .registry
        .register_webhook(&body.node_id, &body.url, body.schema)
        .map_err(|e| ApiError::new(e, ctx.trace_id.clone()))?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "node_id": registration.node_id,
            "url": registration.url,
            "callback_secret": registration.callback_secret,
            "trace_id": ctx.trace_id,
        })),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_flows(
    State(state): State<AppState>,
    _ctx: TenantContext,
) -> impl IntoResponse {
    let flows = state.flows.list();
    let summaries: Vec<serde_json::Value> = flows
        .iter()
        .map(|f| {
            serde_json::json!({
                "name": f.name,
                "description": f.description,
                "states": f.states.len(),
                "transitions": f.transitions.len(),
            })
        })
        .collect();
    Json(serde_json::json!({
        "count": summaries.len(),
        "flows": summaries,
    }))
}

pub async fn get_flow(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(flow_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let flow = state
        .flows
        .get(&flow_id)
        .ok_or_else(|| ApiError::new(Error::FlowNotFound(flow_id), ctx.trace_id.clone()))?;
    Ok(Json(serde_json::to_value(flow).unwrap_or_default()))
}

/// Register a flow definition. Accepts the JSON shape of the YAML
/// format; node references must resolve at registration time.
pub async fn register_flow(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(flow): Json<FlowDefinition>,
) -> Result<impl IntoResponse, ApiError> {
    let reject = |e: Error| ApiError::new(e, ctx.trace_id.clone());

    // Load-time invariant: every mapped node resolves in the registry.
    for (node_state, node_ref) in &flow.state_node_map {
        state.registry.resolve(node_ref).map_err(|e| {
            reject(Error::BadRequest(format!(
                "state {node_state:?}: node ref {node_ref:?} does not resolve: {e}"
            )))
        })?;
    }
    let name = flow.name.clone();
    state.flows.register(flow).map_err(reject)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "name": name,
            "trace_id": ctx.trace_id,
        })),
    ))
}
