//! Classification of vendor HTTP failures into transient and permanent
//! provider call errors.

use serde_json::Value as JsonValue;

use tripline_core::defaults::RESPONSE_EXCERPT_CHARS;
use tripline_core::{CallErrorKind, Error, ProviderCallError, ProviderKind};

/// Failure class derived from an HTTP status and vendor error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorCode {
    /// Invalid or revoked credentials.
    AuthenticationError,
    /// Malformed or oversized request.
    InvalidRequest,
    /// Model not found or not available to this key.
    ModelNotFound,
    /// Rate limit or quota exceeded.
    RateLimitExceeded,
    /// Vendor-side failure or overload.
    ServerError,
    /// Request timed out upstream.
    Timeout,
    Unknown,
}

impl HttpErrorCode {
    /// Determine error code from HTTP status and vendor error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401 | 403, _) => Self::AuthenticationError,
            (429, _) | (_, "rate_limit_error" | "RESOURCE_EXHAUSTED") => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found" | "not_found_error") => Self::ModelNotFound,
            (408, _) => Self::Timeout,
            (400 | 413 | 422, _) => Self::InvalidRequest,
            (500..=599, _) | (_, "overloaded_error") => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded | Self::ServerError | Self::Timeout
        )
    }

    pub fn call_kind(&self) -> CallErrorKind {
        if self.is_retryable() {
            CallErrorKind::Transient
        } else {
            CallErrorKind::Permanent
        }
    }
}

/// Build a provider error from a non-success response body.
pub fn status_error(kind: ProviderKind, status: u16, body: &str) -> Error {
    let (error_type, message) = parse_error_body(body);
    let code = HttpErrorCode::from_response(status, &error_type);
    let message = if message.is_empty() {
        format!("HTTP {}", status)
    } else {
        message
    };
    Error::ProviderCall(ProviderCallError {
        provider: kind.to_string(),
        kind: code.call_kind(),
        status: Some(status),
        message,
    })
}

/// Classify a transport-level reqwest failure.
pub fn request_error(kind: ProviderKind, e: reqwest::Error) -> Error {
    let message = e.to_string();
    let err = if e.is_builder() {
        ProviderCallError::permanent(kind.to_string(), message)
    } else {
        ProviderCallError::transient(kind.to_string(), message)
    };
    Error::ProviderCall(err)
}

/// A 2xx response whose body could not be understood.
pub fn malformed_response(kind: ProviderKind, detail: impl std::fmt::Display) -> Error {
    Error::ProviderCall(ProviderCallError::transient(
        kind.to_string(),
        format!("malformed response: {}", detail),
    ))
}

/// Extract `(type, message)` from the usual vendor error envelopes:
/// `{"error": {"type"|"status"|"code", "message"}}`, `{"error": "..."}`,
/// or a plain text body.
fn parse_error_body(body: &str) -> (String, String) {
    let Ok(json) = serde_json::from_str::<JsonValue>(body) else {
        return (String::new(), excerpt(body.trim()));
    };
    match json.get("error") {
        Some(JsonValue::Object(obj)) => {
            let error_type = ["type", "status", "code"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(JsonValue::as_str))
                .unwrap_or_default()
                .to_string();
            let message = obj
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            (error_type, message)
        }
        Some(JsonValue::String(s)) => (String::new(), s.clone()),
        _ => (String::new(), excerpt(body.trim())),
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(RESPONSE_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_status() {
        assert_eq!(HttpErrorCode::from_response(401, ""), HttpErrorCode::AuthenticationError);
        assert_eq!(HttpErrorCode::from_response(429, ""), HttpErrorCode::RateLimitExceeded);
        assert_eq!(HttpErrorCode::from_response(404, ""), HttpErrorCode::ModelNotFound);
        assert_eq!(HttpErrorCode::from_response(400, ""), HttpErrorCode::InvalidRequest);
        assert_eq!(HttpErrorCode::from_response(503, ""), HttpErrorCode::ServerError);
        assert_eq!(HttpErrorCode::from_response(529, "overloaded_error"), HttpErrorCode::ServerError);
        assert_eq!(HttpErrorCode::from_response(418, ""), HttpErrorCode::Unknown);
    }

    #[test]
    fn test_retryable_classes() {
        assert!(HttpErrorCode::RateLimitExceeded.is_retryable());
        assert!(HttpErrorCode::ServerError.is_retryable());
        assert!(HttpErrorCode::Timeout.is_retryable());
        assert!(!HttpErrorCode::AuthenticationError.is_retryable());
        assert!(!HttpErrorCode::ModelNotFound.is_retryable());
        assert!(!HttpErrorCode::Unknown.is_retryable());
    }

    #[test]
    fn test_status_error_reads_nested_message() {
        let body = r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#;
        let err = status_error(ProviderKind::OpenAi, 429, body);
        match err {
            Error::ProviderCall(e) => {
                assert!(e.is_transient());
                assert_eq!(e.status, Some(429));
                assert_eq!(e.message, "Rate limit reached");
                assert_eq!(e.provider, "openai");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_status_error_plain_text_body() {
        let err = status_error(ProviderKind::Claude, 401, "unauthorized");
        assert!(!err.is_transient());
        assert!(err.to_string().contains("unauthorized"));
    }

    #[test]
    fn test_status_error_empty_body_uses_status() {
        let err = status_error(ProviderKind::Gemini, 500, "");
        assert!(err.is_transient());
        assert!(err.to_string().contains("HTTP 500"));
    }
}
