use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_url")]
    pub base_url: String,
    /// Environment variable holding the API key. Read once at startup.
    #[serde(default = "d_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    #[serde(default = "d_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_url(),
            api_key_env: d_llm_key_env(),
            model: d_llm_model(),
            timeout_secs: d_llm_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data service (document ingestion + semantic query)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataServiceConfig {
    #[serde(default = "d_ds_url")]
    pub base_url: String,
    #[serde(default = "d_ds_timeout")]
    pub timeout_secs: u64,
    /// Deadline for a single file-parse request from the chat path.
    #[serde(default = "d_parse_timeout")]
    pub parse_timeout_secs: u64,
}

impl Default for DataServiceConfig {
    fn default() -> Self {
        Self {
            base_url: d_ds_url(),
            timeout_secs: d_ds_timeout(),
            parse_timeout_secs: d_parse_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Object store (direct-upload POST policies)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Bucket endpoint the browser uploads to, e.g.
    /// `https://bucket.oss-cn-hangzhou.example.com`.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub access_key_id: String,
    /// Environment variable holding the signing secret.
    #[serde(default = "d_oss_secret_env")]
    pub access_key_secret_env: String,
    /// Default policy lifetime when the request does not specify one.
    #[serde(default = "d_oss_expire")]
    pub default_expire_secs: u64,
    /// Hard cap on requested policy lifetimes.
    #[serde(default = "d_oss_max_expire")]
    pub max_expire_secs: u64,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            access_key_id: String::new(),
            access_key_secret_env: d_oss_secret_env(),
            default_expire_secs: d_oss_expire(),
            max_expire_secs: d_oss_max_expire(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_llm_url() -> String {
    "http://127.0.0.1:9410".into()
}
fn d_llm_key_env() -> String {
    "MAESTRO_LLM_API_KEY".into()
}
fn d_llm_model() -> String {
    "default".into()
}
fn d_llm_timeout() -> u64 {
    60
}
fn d_ds_url() -> String {
    "http://127.0.0.1:9420".into()
}
fn d_ds_timeout() -> u64 {
    120
}
fn d_parse_timeout() -> u64 {
    60
}
fn d_oss_secret_env() -> String {
    "MAESTRO_OSS_SECRET".into()
}
fn d_oss_expire() -> u64 {
    300
}
fn d_oss_max_expire() -> u64 {
    3600
}
