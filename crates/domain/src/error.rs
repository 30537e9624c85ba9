use serde::Serialize;

/// Shared error type used across all Maestro crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid transition: state {state} has no transition for {event}")]
    InvalidTransition { state: String, event: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream {service}: {message}")]
    Upstream { service: String, message: String },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The closed error-code set exposed on HTTP responses and `error` SSE
/// frames. Every [`Error`] maps onto exactly one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    SessionNotFound,
    InvalidTransition,
    Conflict,
    RateLimited,
    UpstreamError,
    InternalError,
}

impl ErrorCode {
    /// Whether a client may retry the same request and expect a
    /// different outcome.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::Conflict | Self::RateLimited | Self::UpstreamError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::BadRequest(_) | Error::Json(_) | Error::Yaml(_) => ErrorCode::BadRequest,
            Error::Unauthorized(_) => ErrorCode::Unauthorized,
            Error::Forbidden(_) => ErrorCode::Forbidden,
            Error::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Error::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Error::Conflict(_) => ErrorCode::Conflict,
            Error::RateLimited(_) => ErrorCode::RateLimited,
            Error::Upstream { .. } | Error::Http(_) | Error::Timeout(_) => {
                ErrorCode::UpstreamError
            }
            Error::NodeNotFound(_) | Error::FlowNotFound(_) => ErrorCode::BadRequest,
            Error::Io(_) | Error::Config(_) | Error::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping_covers_taxonomy() {
        assert_eq!(
            Error::BadRequest("x".into()).code(),
            ErrorCode::BadRequest
        );
        assert_eq!(
            Error::SessionNotFound("s".into()).code(),
            ErrorCode::SessionNotFound
        );
        assert_eq!(
            Error::InvalidTransition {
                state: "a".into(),
                event: "E".into()
            }
            .code(),
            ErrorCode::InvalidTransition
        );
        assert_eq!(
            Error::Upstream {
                service: "llm".into(),
                message: "502".into()
            }
            .code(),
            ErrorCode::UpstreamError
        );
    }

    #[test]
    fn retryable_codes() {
        assert!(ErrorCode::Conflict.retryable());
        assert!(ErrorCode::RateLimited.retryable());
        assert!(ErrorCode::UpstreamError.retryable());
        assert!(!ErrorCode::BadRequest.retryable());
        assert!(!ErrorCode::InternalError.retryable());
    }

    #[test]
    fn code_serializes_screaming_snake() {
        let v = serde_json::to_value(ErrorCode::RateLimited).unwrap();
        assert_eq!(v, serde_json::json!("RATE_LIMITED"));
        assert_eq!(ErrorCode::RateLimited.as_str(), "RATE_LIMITED");
    }
}
