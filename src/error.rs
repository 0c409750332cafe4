//! Error types for the job engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration-related errors. Raised before any job can be submitted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} already exists")]
    Duplicate { id: String },

    #[error("Job {id} not found")]
    NotFound { id: String },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },
}

/// Failure reported by a job handler.
///
/// Stored on the failed job record and carried by `job:failed` events, so it
/// is plain data rather than a boxed source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct HandlerError {
    /// Human readable failure message.
    pub message: String,
    /// Underlying cause, when the handler knows one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// The handler did not finish within the engine's job timeout.
    pub fn timed_out(limit: Duration) -> Self {
        Self::new(format!("Job timed out after {limit:?}"))
    }

    /// The handler task panicked or was aborted.
    pub fn panicked(detail: impl std::fmt::Display) -> Self {
        Self::new("Job handler panicked").with_cause(detail.to_string())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        let message = err.to_string();
        let root = err.root_cause().to_string();
        if root == message {
            Self::new(message)
        } else {
            Self::new(message).with_cause(root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_display_uses_message() {
        let err = HandlerError::new("malformed input").with_cause("missing field `path`");
        assert_eq!(err.to_string(), "malformed input");
        assert_eq!(err.cause.as_deref(), Some("missing field `path`"));
    }

    #[test]
    fn handler_error_from_anyhow_keeps_root_cause() {
        let inner = anyhow::anyhow!("connection refused");
        let err: HandlerError = inner.context("fetching snapshot").into();
        assert_eq!(err.message, "fetching snapshot");
        assert_eq!(err.cause.as_deref(), Some("connection refused"));
    }

    #[test]
    fn handler_error_from_anyhow_without_context() {
        let err: HandlerError = anyhow::anyhow!("boom").into();
        assert_eq!(err.message, "boom");
        assert!(err.cause.is_none());
    }

    #[test]
    fn handler_error_serde_omits_empty_cause() {
        let json = serde_json::to_string(&HandlerError::new("nope")).unwrap();
        assert_eq!(json, r#"{"message":"nope"}"#);
    }

    #[test]
    fn duplicate_error_message() {
        let err = JobError::Duplicate { id: "a".into() };
        assert_eq!(err.to_string(), "Job a already exists");
    }
}
