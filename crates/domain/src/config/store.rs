use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store (fast store + durable repositories)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key prefix for every fast-store key and bus channel
    /// (`{prefix}:{tenant}:events`).
    #[serde(default = "d_prefix")]
    pub prefix: String,
    /// Directory holding the durable JSON/JSONL repositories.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Default session TTL in seconds.
    #[serde(default = "d_session_ttl")]
    pub session_ttl_secs: u64,
    /// Tempo clock sweep interval in seconds.
    #[serde(default = "d_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: d_prefix(),
            state_path: d_state_path(),
            session_ttl_secs: d_session_ttl(),
            sweep_interval_secs: d_sweep_interval(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_prefix() -> String {
    "maestro".into()
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}
fn d_session_ttl() -> u64 {
    1800
}
fn d_sweep_interval() -> u64 {
    30
}
