//! Liveness and counters.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health — lightweight probe, no tenant headers required
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/metrics — runtime counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.list();
    let active = sessions
        .iter()
        .filter(|s| !s.status.is_terminal())
        .count();

    Json(serde_json::json!({
        "runtime": state.metrics.snapshot(),
        "sessions": {
            "total": sessions.len(),
            "active": active,
        },
        "events": {
            "total": state.events.count(),
            "sessions": state.events.session_count(),
        },
        "flows": state.flows.count(),
        "nodes": {
            "builtin": state.registry.builtin_count(),
            "registered": state.registry.list().len(),
        },
        "snapshots": state.snapshots.count(),
        "tenants_in_flight": state.limits.tenant_count(),
    }))
}
