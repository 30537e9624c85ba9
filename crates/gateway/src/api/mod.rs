pub mod admin;
pub mod chat;
pub mod oss;
pub mod registry;
pub mod tenant;
pub mod workflow;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;

use ms_domain::error::{Error, ErrorCode};

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Liveness + counters
        .route("/health", get(admin::health))
        .route("/api/metrics", get(admin::metrics))
        // Chat (the SSE surface)
        .route("/api/agent/chat", post(chat::chat))
        // Direct-upload policies
        .route("/api/oss/post-signature", post(oss::post_signature))
        // Workflow control plane
        .route("/api/workflow/start", post(workflow::start))
        .route("/api/workflow/:session/event", post(workflow::push_event))
        .route("/api/workflow/:session/state", get(workflow::get_state))
        .route("/api/workflow/:session", delete(workflow::hard_stop))
        .route("/api/workflow/:session/callback", post(workflow::callback))
        .route("/api/workflow/:session/events", get(workflow::replay))
        // Registry
        .route(
            "/api/registry/nodes",
            get(registry::list_nodes).post(registry::register_node),
        )
        .route(
            "/api/registry/flows",
            get(registry::list_flows).post(registry::register_flow),
        )
        .route("/api/registry/flows/:id", get(registry::get_flow))
        .layer(middleware::from_fn(tenant::propagate_trace))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A domain error paired with the request trace id, rendered as the
/// standard JSON error body.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub trace_id: String,
}

impl ApiError {
    pub fn new(error: Error, trace_id: impl Into<String>) -> Self {
        Self {
            error,
            trace_id: trace_id.into(),
        }
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidTransition | ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error.code();
        (
            status_for(code),
            Json(serde_json::json!({
                "error": {
                    "code": code,
                    "message": self.error.to_string(),
                    "retryable": code.retryable(),
                },
                "trace_id": self.trace_id,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(status_for(ErrorCode::BadRequest), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorCode::SessionNotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for(ErrorCode::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorCode::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_for(ErrorCode::UpstreamError), StatusCode::BAD_GATEWAY);
    }
}
