use serde::Serialize;

/// Structured audit events emitted across all Maestro crates.
///
/// These land in the JSON log stream as `maestro_event` records and are
/// the operator-facing counterpart of the per-session event log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum TraceEvent {
    SessionStarted {
        tenant_id: String,
        session_id: String,
        flow_id: String,
        implicit: bool,
    },
    SessionPaused {
        session_id: String,
        idle_secs: i64,
    },
    SessionRehydrated {
        session_id: String,
    },
    StateTransition {
        session_id: String,
        from: String,
        to: String,
        event: String,
    },
    NodeDispatched {
        session_id: String,
        step: String,
        node_ref: String,
        attempt: u32,
    },
    NodeCompleted {
        session_id: String,
        step: String,
        status: String,
        duration_ms: u64,
    },
    StepSkippedIdempotent {
        session_id: String,
        step: String,
        attempt: u32,
    },
    FanInPending {
        session_id: String,
        step: String,
        missing: Vec<String>,
    },
    AbortRequested {
        session_id: String,
        reason: String,
    },
    RetryScheduled {
        session_id: String,
        step: String,
        attempt: u32,
        delay_ms: u64,
    },
    WebhookCallback {
        session_id: String,
        step: String,
        post_abort: bool,
    },
    UpstreamCall {
        service: String,
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    ChatTurnFinished {
        tenant_id: String,
        session_id: String,
        tool_calls: u32,
        frames: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "maestro_event");
    }
}
