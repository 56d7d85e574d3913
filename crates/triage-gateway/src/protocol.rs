//! Gateway HTTP protocol: request and response bodies

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use triage_core::TurnError;

/// `POST /invocations` body; the session id travels in a header
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationBody {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

impl PingResponse {
    pub fn healthy() -> Self {
        Self {
            status: "Healthy".to_string(),
        }
    }
}

/// Error returned before a turn starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

// ── Error codes ──

pub const ERR_MISSING_FIELD: &str = "MissingField";
pub const ERR_MISSING_SESSION: &str = "MissingSession";
pub const ERR_INVALID_BODY: &str = "InvalidBody";
pub const ERR_SESSION_REJECTED: &str = "SessionRejected";
pub const ERR_NO_AGENTS: &str = "NoAgents";

impl ErrorBody {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

/// HTTP status and body for a turn that never started
pub fn turn_error_response(err: &TurnError) -> (StatusCode, ErrorBody) {
    let (status, code) = match err {
        TurnError::MissingField(_) => (StatusCode::BAD_REQUEST, ERR_MISSING_FIELD),
        TurnError::MissingSession => (StatusCode::BAD_REQUEST, ERR_MISSING_SESSION),
        TurnError::Setup(_) => (StatusCode::BAD_REQUEST, ERR_SESSION_REJECTED),
        TurnError::EmptyRegistry => (StatusCode::INTERNAL_SERVER_ERROR, ERR_NO_AGENTS),
    };
    (status, ErrorBody::new(code, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_without_prompt() {
        let body: InvocationBody = serde_json::from_str("{}").unwrap();
        assert!(body.prompt.is_none());
        let body: InvocationBody = serde_json::from_str(r#"{"prompt":"hi","extra":1}"#).unwrap();
        assert_eq!(body.prompt.as_deref(), Some("hi"));
    }

    #[test]
    fn test_caller_errors_are_bad_requests() {
        let (status, body) = turn_error_response(&TurnError::MissingField("prompt"));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, ERR_MISSING_FIELD);
        assert!(body.message.contains("prompt"));

        let (status, body) = turn_error_response(&TurnError::MissingSession);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, ERR_MISSING_SESSION);

        let (status, _) = turn_error_response(&TurnError::EmptyRegistry);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_ping_shape() {
        let value = serde_json::to_value(PingResponse::healthy()).unwrap();
        assert_eq!(value, serde_json::json!({"status": "Healthy"}));
    }
}
