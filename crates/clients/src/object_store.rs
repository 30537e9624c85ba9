//! POST-policy signing for browser-direct uploads.
//!
//! The server never touches file bytes: it hands the browser a
//! short-lived policy document plus a signature, and the browser POSTs
//! the file straight to the bucket. The policy is the base64 of a JSON
//! document; the signature is base64(HMAC-SHA1(secret, policy)).

use base64::Engine;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;
use uuid::Uuid;

use ms_domain::config::ObjectStoreConfig;
use ms_domain::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// Maximum accepted upload size baked into every policy (64 MiB).
const MAX_UPLOAD_BYTES: u64 = 64 * 1024 * 1024;

/// What the client needs to perform the upload, plus the canonical
/// object URL it will later hand back in `messages[].files[].url`.
#[derive(Debug, Clone, Serialize)]
pub struct PostPolicy {
    pub method: String,
    /// Bucket endpoint the form POSTs to.
    pub url: String,
    pub key: String,
    pub policy: String,
    pub signature: String,
    #[serde(rename = "OSSAccessKeyId")]
    pub access_key_id: String,
    pub success_action_status: String,
    /// Unix seconds after which the policy is refused.
    pub expire_at: i64,
    pub object_url: String,
}

pub struct PostPolicySigner {
    endpoint: String,
    bucket: String,
    access_key_id: String,
    secret: String,
    default_expire_secs: u64,
    max_expire_secs: u64,
}

impl PostPolicySigner {
    /// Build from config; the secret comes from the configured
    /// environment variable. Returns None when no endpoint is
    /// configured (the signature endpoint then refuses requests).
    pub fn from_config(config: &ObjectStoreConfig) -> Option<Self> {
        if config.endpoint.is_empty() {
            return None;
        }
        let secret = std::env::var(&config.access_key_secret_env).unwrap_or_default();
        Some(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            bucket: config.bucket.clone(),
            access_key_id: config.access_key_id.clone(),
            secret,
            default_expire_secs: config.default_expire_secs,
            max_expire_secs: config.max_expire_secs,
        })
    }

    pub fn sign(
        &self,
        filename: &str,
        _content_type: &str,
        dir: &str,
        expire_seconds: Option<u64>,
    ) -> Result<PostPolicy> {
        let filename = sanitize_filename(filename)?;
        let dir = dir.trim_matches('/');
        if dir.contains("..") {
            return Err(Error::BadRequest("dir must not contain '..'".into()));
        }

        let expire_secs = expire_seconds
            .unwrap_or(self.default_expire_secs)
            .min(self.max_expire_secs)
            .max(1);
        let expire_at = Utc::now() + chrono::Duration::seconds(expire_secs as i64);

        let key = if dir.is_empty() {
            format!("{}_{filename}", Uuid::new_v4().simple())
        } else {
            format!("{dir}/{}_{filename}", Uuid::new_v4().simple())
        };

        let policy_doc = serde_json::json!({
            "expiration": expire_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "conditions": [
                { "bucket": self.bucket },
                ["eq", "$key", key],
                ["content-length-range", 0, MAX_UPLOAD_BYTES],
            ],
        });
        let policy = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&policy_doc)?);

        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Internal(format!("hmac init: {e}")))?;
        mac.update(policy.as_bytes());
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        Ok(PostPolicy {
            method: "POST".into(),
            url: self.endpoint.clone(),
            object_url: format!("{}/{key}", self.endpoint),
            key,
            policy,
            signature,
            access_key_id: self.access_key_id.clone(),
            success_action_status: "200".into(),
            expire_at: expire_at.timestamp(),
        })
    }
}

/// Keep the basename only and refuse empty or path-traversal names.
fn sanitize_filename(raw: &str) -> Result<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::BadRequest(format!("invalid filename {raw:?}")));
    }
    Ok(name.replace(
        |c: char| c.is_control() || c == '{' || c == '}' || c == '$',
        "_",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> PostPolicySigner {
        PostPolicySigner {
            endpoint: "https://bucket.oss.example.com".into(),
            bucket: "bucket".into(),
            access_key_id: "AKID".into(),
            secret: "secret".into(),
            default_expire_secs: 300,
            max_expire_secs: 3600,
        }
    }

    #[test]
    fn policy_shape() {
        let policy = signer()
            .sign("quote.pdf", "application/pdf", "uploads/t1", None)
            .unwrap();
        assert_eq!(policy.method, "POST");
        assert_eq!(policy.url, "https://bucket.oss.example.com");
        assert!(policy.key.starts_with("uploads/t1/"));
        assert!(policy.key.ends_with("_quote.pdf"));
        assert_eq!(policy.object_url, format!("{}/{}", policy.url, policy.key));
        assert_eq!(policy.success_action_status, "200");
        assert!(policy.expire_at > Utc::now().timestamp());

        // The policy decodes back to the signed conditions.
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&policy.policy)
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(doc["conditions"][0]["bucket"], "bucket");
        assert_eq!(doc["conditions"][1][1], "$key");
    }

    #[test]
    fn signature_is_deterministic_for_same_policy() {
        let s = signer();
        let a = s.sign("a.txt", "text/plain", "d", Some(60)).unwrap();
        // Same policy string must produce the same signature.
        let mut mac = HmacSha1::new_from_slice(b"secret").unwrap();
        mac.update(a.policy.as_bytes());
        let expected =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        assert_eq!(a.signature, expected);
    }

    #[test]
    fn expire_is_capped() {
        let policy = signer()
            .sign("a.txt", "text/plain", "d", Some(999_999))
            .unwrap();
        let max = Utc::now().timestamp() + 3600 + 5;
        assert!(policy.expire_at <= max);
    }

    #[test]
    fn filename_is_sanitized() {
        let policy = signer()
            .sign("../../etc/passwd", "text/plain", "d", None)
            .unwrap();
        assert!(policy.key.ends_with("_passwd"));
        assert!(!policy.key.contains(".."));

        assert!(signer().sign("", "text/plain", "d", None).is_err());
        assert!(signer().sign("..", "text/plain", "d", None).is_err());
    }

    #[test]
    fn dir_traversal_is_refused() {
        assert!(signer().sign("a.txt", "text/plain", "../secrets", None).is_err());
    }

    #[test]
    fn missing_endpoint_disables_signer() {
        let config = ObjectStoreConfig::default();
        assert!(PostPolicySigner::from_config(&config).is_none());
    }
}
