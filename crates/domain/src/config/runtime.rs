use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Maximum tool iterations per turn before the controller gives up.
    #[serde(default = "d_max_tool_loops")]
    pub max_tool_loops: u32,
    /// Idle heartbeat interval for SSE responses, in seconds.
    #[serde(default = "d_heartbeat")]
    pub heartbeat_secs: u64,
    /// Deadline for a single SSE frame write before the response is
    /// considered stuck and aborted.
    #[serde(default = "d_write_deadline")]
    pub write_deadline_secs: u64,
    /// Grace period granted after a client disconnect for the final
    /// `done` attempt.
    #[serde(default = "d_disconnect_grace")]
    pub disconnect_grace_secs: u64,
    /// Maximum concurrent chat turns per tenant.
    #[serde(default = "d_tenant_inflight")]
    pub max_inflight_per_tenant: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tool_loops: d_max_tool_loops(),
            heartbeat_secs: d_heartbeat(),
            write_deadline_secs: d_write_deadline(),
            disconnect_grace_secs: d_disconnect_grace(),
            max_inflight_per_tenant: d_tenant_inflight(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry policy defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "d_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "d_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            backoff_base_secs: d_backoff_base(),
            backoff_multiplier: d_backoff_multiplier(),
            max_backoff_secs: d_max_backoff(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Directory of flow YAML files loaded at startup.
    #[serde(default = "d_flows_path")]
    pub path: PathBuf,
    /// Webhook call deadline in seconds.
    #[serde(default = "d_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            path: d_flows_path(),
            webhook_timeout_secs: d_webhook_timeout(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_tool_loops() -> u32 {
    6
}
fn d_heartbeat() -> u64 {
    15
}
fn d_write_deadline() -> u64 {
    5
}
fn d_disconnect_grace() -> u64 {
    2
}
fn d_tenant_inflight() -> usize {
    8
}
fn d_max_attempts() -> u32 {
    3
}
fn d_backoff_base() -> u64 {
    1
}
fn d_backoff_multiplier() -> u32 {
    2
}
fn d_max_backoff() -> u64 {
    60
}
fn d_flows_path() -> PathBuf {
    PathBuf::from("./flows")
}
fn d_webhook_timeout() -> u64 {
    30
}
