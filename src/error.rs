//! Error types for the office session hub
//!
//! Structured errors via thiserror; the binary and the server entry points
//! propagate with anyhow.

use thiserror::Error;

/// Main error type for hub operations
#[derive(Error, Debug)]
pub enum OfficeError {
    /// Event payload rejected before it reached a session
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Session was deleted and the event cannot recreate it
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Snapshot or preference storage failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Session actor could not be spawned or reached
    #[error("Session actor error: {0}")]
    Actor(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, OfficeError>;

/// Reasons an incoming event payload is rejected
///
/// Each variant maps to a stable code that is returned to the producer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload is not a JSON object: {0}")]
    MalformedPayload(String),

    #[error("session_id must be a non-empty string")]
    MissingSessionId,

    #[error("event_type must be a string")]
    MissingEventType,

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("missing required field `{field}` for {event_type}")]
    MissingField { event_type: String, field: String },

    #[error("invalid field for {event_type}: {reason}")]
    InvalidField { event_type: String, reason: String },

    #[error("duplicate todo id: {0}")]
    DuplicateTodoId(String),
}

impl ValidationError {
    /// Machine-readable code identifying the violated constraint
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MalformedPayload(_) => "malformed_payload",
            ValidationError::MissingSessionId => "missing_session_id",
            ValidationError::MissingEventType => "missing_event_type",
            ValidationError::UnknownEventType(_) => "unknown_event_type",
            ValidationError::MissingField { .. } => "missing_field",
            ValidationError::InvalidField { .. } => "invalid_field",
            ValidationError::DuplicateTodoId(_) => "duplicate_todo_id",
        }
    }
}

impl From<rusqlite::Error> for OfficeError {
    fn from(err: rusqlite::Error) -> Self {
        OfficeError::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OfficeError::SessionNotFound("sess-9".to_string());
        assert_eq!(err.to_string(), "Session not found: sess-9");
    }

    #[test]
    fn test_validation_codes() {
        assert_eq!(ValidationError::MissingSessionId.code(), "missing_session_id");
        assert_eq!(
            ValidationError::UnknownEventType("nap".into()).code(),
            "unknown_event_type"
        );
        let err = ValidationError::MissingField {
            event_type: "tool_use_end".into(),
            field: "success".into(),
        };
        assert_eq!(err.code(), "missing_field");
        assert!(err.to_string().contains("`success`"));
    }

    #[test]
    fn test_validation_converts_into_office_error() {
        let err: OfficeError = ValidationError::MissingEventType.into();
        assert!(matches!(err, OfficeError::Validation(_)));
    }
}
