//! Error types for the guard-core crate

use std::fmt;
use thiserror::Error;

/// Why a cloud call failed permanently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentReason {
    Quota,
    PermissionDenied,
    InvalidParameter,
    Conflict,
    Other,
}

impl fmt::Display for PermanentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermanentReason::Quota => write!(f, "quota exceeded"),
            PermanentReason::PermissionDenied => write!(f, "permission denied"),
            PermanentReason::InvalidParameter => write!(f, "invalid parameter"),
            PermanentReason::Conflict => write!(f, "conflict"),
            PermanentReason::Other => write!(f, "failed"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Transient cloud error during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("Cloud call {operation} {reason}: {message}")]
    Permanent {
        operation: String,
        reason: PermanentReason,
        message: String,
    },

    #[error("Guard {guard_id} partially created ({} resources exist): {source}", existing.len())]
    PartialProvision {
        guard_id: String,
        existing: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Command execution failed: {cmd} - {message}")]
    Command { cmd: String, message: String },

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(kind: impl fmt::Display, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn permanent(
        operation: impl Into<String>,
        reason: PermanentReason,
        message: impl Into<String>,
    ) -> Self {
        Error::Permanent {
            operation: operation.into(),
            reason,
            message: message.into(),
        }
    }

    /// Wrap a failure that happened after some of a guard's resources exist
    pub fn partial(guard_id: impl fmt::Display, existing: Vec<String>, source: Error) -> Self {
        match source {
            Error::PartialProvision { .. } => source,
            other => Error::PartialProvision {
                guard_id: guard_id.to_string(),
                existing,
                source: Box::new(other),
            },
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Error::Cancelled {
            operation: operation.into(),
        }
    }

    /// Only transient cloud errors are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Error::Permanent {
                reason: PermanentReason::PermissionDenied,
                ..
            }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
