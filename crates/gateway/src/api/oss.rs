//! `POST /api/oss/post-signature` — short-lived direct-upload policies.
//!
//! The browser uploads straight to the bucket with the returned form
//! fields and later hands the `object_url` back in
//! `messages[].files[].url`; the server never sees file bytes.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use ms_domain::error::Error;

use crate::state::AppState;

use super::tenant::TenantContext;
use super::ApiError;

#[derive(Debug, Deserialize)]
pub struct SignatureRequest {
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub expire_seconds: Option<u64>,
}

pub async fn post_signature(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<SignatureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reject = |e: Error| ApiError::new(e, ctx.trace_id.clone());

    let signer = state.signer.as_ref().ok_or_else(|| {
        reject(Error::Upstream {
            service: "object_store".into(),
            message: "no object store is configured".into(),
        })
    })?;

    // Scope uploads under the tenant by default.
    let dir = body
        .dir
        .clone()
        .unwrap_or_else(|| format!("uploads/{}", ctx.tenant_id));

    let policy = signer
        .sign(&body.filename, &body.content_type, &dir, body.expire_seconds)
        .map_err(reject)?;

    Ok(Json(serde_json::json!({
        "policy": policy,
        "trace_id": ctx.trace_id,
    })))
}
