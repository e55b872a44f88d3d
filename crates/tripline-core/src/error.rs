//! Error types for tripline.

use std::fmt;

use thiserror::Error;

/// Result type alias using tripline's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Whether a failed provider call may succeed on another attempt or provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorKind {
    /// Rate limit, timeout, connection failure, 5xx-equivalent.
    Transient,
    /// Authentication failure, invalid request, unknown model.
    Permanent,
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// A failed call to an AI provider, classified for fallback decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCallError {
    /// Provider name (e.g. "gemini", "openai").
    pub provider: String,
    pub kind: CallErrorKind,
    /// HTTP status when the failure came from a response.
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderCallError {
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: CallErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: CallErrorKind::Permanent,
            status: None,
            message: message.into(),
        }
    }

    /// Attach the HTTP status that produced this error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == CallErrorKind::Transient
    }
}

impl fmt::Display for ProviderCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} failure", self.provider, self.kind)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ProviderCallError {}

/// Core error type for tripline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid provider credentials or settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// A provider call failed
    #[error("Provider call error: {0}")]
    ProviderCall(ProviderCallError),

    /// Every entry of a fallback chain failed
    #[error("All providers failed. Last error: {0}")]
    ProviderChainExhausted(String),

    /// AI response could not be normalized into the canonical shape
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Persistence or connectivity failures abort a whole run instead of
    /// being recorded against a single email.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_))
    }

    /// True for provider failures that should advance a fallback chain.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ProviderCall(e) if e.is_transient())
    }
}

impl From<ProviderCallError> for Error {
    fn from(e: ProviderCallError) -> Self {
        Error::ProviderCall(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return Error::ProviderCall(ProviderCallError::transient("http", e.to_string()));
        }
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("email abc".to_string());
        assert_eq!(err.to_string(), "Not found: email abc");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing API key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_error_display_chain_exhausted() {
        let err = Error::ProviderChainExhausted("openai transient failure: 503".to_string());
        assert_eq!(
            err.to_string(),
            "All providers failed. Last error: openai transient failure: 503"
        );
    }

    #[test]
    fn test_error_display_schema_violation() {
        let err = Error::SchemaViolation("missing booking_type".to_string());
        assert_eq!(err.to_string(), "Schema violation: missing booking_type");
    }

    #[test]
    fn test_provider_call_error_display_with_status() {
        let err = ProviderCallError::transient("gemini", "quota exhausted").with_status(429);
        assert_eq!(
            err.to_string(),
            "gemini transient failure (HTTP 429): quota exhausted"
        );
    }

    #[test]
    fn test_provider_call_error_display_without_status() {
        let err = ProviderCallError::permanent("claude", "invalid x-api-key");
        assert_eq!(err.to_string(), "claude permanent failure: invalid x-api-key");
    }

    #[test]
    fn test_is_transient() {
        let transient: Error = ProviderCallError::transient("openai", "timeout").into();
        let permanent: Error = ProviderCallError::permanent("openai", "bad key").into();
        assert!(transient.is_transient());
        assert!(!permanent.is_transient());
        assert!(!Error::Internal("x".into()).is_transient());
    }

    #[test]
    fn test_is_infrastructure() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        assert!(Error::Io(io_err).is_infrastructure());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_infrastructure());
        assert!(!Error::SchemaViolation("x".into()).is_infrastructure());
        assert!(!Error::ProviderChainExhausted("x".into()).is_infrastructure());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
