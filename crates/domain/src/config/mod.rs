mod clients;
mod runtime;
mod server;
mod store;

pub use clients::*;
pub use runtime::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub data_service: DataServiceConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let error = |message: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            message,
        };
        let warn = |message: String| ConfigIssue {
            severity: ConfigSeverity::Warning,
            message,
        };

        if self.store.prefix.is_empty() || self.store.prefix.contains(':') {
            issues.push(error(format!(
                "store.prefix must be a non-empty token without ':' (got {:?})",
                self.store.prefix
            )));
        }
        if self.store.session_ttl_secs == 0 {
            issues.push(error("store.session_ttl_secs must be > 0".into()));
        }
        if self.store.sweep_interval_secs == 0 {
            issues.push(error("store.sweep_interval_secs must be > 0".into()));
        }
        if self.chat.max_tool_loops == 0 {
            issues.push(error("chat.max_tool_loops must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            issues.push(error("retry.max_attempts must be > 0".into()));
        }
        if self.retry.backoff_multiplier < 1 {
            issues.push(error("retry.backoff_multiplier must be >= 1".into()));
        }
        for (name, url) in [
            ("llm.base_url", &self.llm.base_url),
            ("data_service.base_url", &self.data_service.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(error(format!("{name} must be an http(s) URL (got {url:?})")));
            }
        }
        if self.object_store.endpoint.is_empty() {
            issues.push(warn(
                "object_store.endpoint is unset — /api/oss/post-signature will refuse requests"
                    .into(),
            ));
        } else if self.object_store.access_key_id.is_empty() {
            issues.push(error(
                "object_store.access_key_id is required when an endpoint is configured".into(),
            ));
        }
        if self.object_store.max_expire_secs < self.object_store.default_expire_secs {
            issues.push(error(
                "object_store.max_expire_secs must be >= default_expire_secs".into(),
            ));
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let config = Config::default();
        let issues = config.validate();
        assert!(
            issues
                .iter()
                .all(|i| i.severity == ConfigSeverity::Warning),
            "unexpected errors: {issues:?}"
        );
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8300);
        assert_eq!(config.store.session_ttl_secs, 1800);
        assert_eq!(config.chat.max_tool_loops, 6);
        assert_eq!(config.retry.max_backoff_secs, 60);
    }

    #[test]
    fn partial_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 9000

[store]
prefix = "acme"
session_ttl_secs = 600
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.store.prefix, "acme");
        assert_eq!(config.store.session_ttl_secs, 600);
        // Untouched sections keep their defaults.
        assert_eq!(config.llm.timeout_secs, 60);
    }

    #[test]
    fn bad_prefix_is_an_error() {
        let mut config = Config::default();
        config.store.prefix = "a:b".into();
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn endpoint_without_key_id_is_an_error() {
        let mut config = Config::default();
        config.object_store.endpoint = "https://bucket.example.com".into();
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("access_key_id")));
    }
}
