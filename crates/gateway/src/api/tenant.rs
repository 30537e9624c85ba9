//! Tenant identification headers.
//!
//! Every tenant-bound call must carry `X-Tenant-Id`; chat additionally
//! requires `X-User-Id` (a browser-minted UUID). `X-Trace-Id` is
//! optional — the middleware generates one when absent and echoes it on
//! the response so clients can always correlate.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

use ms_domain::error::Error;

pub const HEADER_TENANT: &str = "x-tenant-id";
pub const HEADER_USER: &str = "x-user-id";
pub const HEADER_TRACE: &str = "x-trace-id";

/// Request-scoped identity, extracted in every tenant-bound handler.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub trace_id: String,
}

impl TenantContext {
    /// Chat requires a user id on top of the tenant.
    pub fn require_user(&self) -> Result<&str, Error> {
        self.user_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Unauthorized("X-User-Id header is required".into()))
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[async_trait::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TenantContext {
    type Rejection = super::ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trace_id = header(parts, HEADER_TRACE)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let tenant_id = header(parts, HEADER_TENANT).ok_or_else(|| {
            super::ApiError::new(
                Error::Unauthorized("X-Tenant-Id header is required".into()),
                trace_id.clone(),
            )
        })?;
        Ok(Self {
            tenant_id,
            user_id: header(parts, HEADER_USER),
            trace_id,
        })
    }
}

/// Middleware: make sure every response echoes a trace id, generated
/// server-side when the client sent none.
pub async fn propagate_trace(req: Request<axum::body::Body>, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(HEADER_TRACE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(HEADER_TRACE, value);
    }
    response
}
