//! Error types for dockhand

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for dockhand
#[derive(Error, Debug)]
pub enum DockhandError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("File system error: {0}")]
    FileSystemError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DockhandError {
    fn from(err: anyhow::Error) -> Self {
        DockhandError::Internal(err.to_string())
    }
}

impl From<redis::RedisError> for DockhandError {
    fn from(err: redis::RedisError) -> Self {
        DockhandError::QueueError(err.to_string())
    }
}

/// Coarse error taxonomy surfaced to upstream callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Execution,
    Timeout,
    FileSystem,
    Infrastructure,
}

impl DockhandError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DockhandError::ValidationError(_)
            | DockhandError::InvalidTransition(_)
            | DockhandError::JsonError(_)
            | DockhandError::YamlError(_) => ErrorKind::Validation,
            DockhandError::NotFound(_) => ErrorKind::NotFound,
            DockhandError::ExecutionError(_) => ErrorKind::Execution,
            DockhandError::Timeout(_) => ErrorKind::Timeout,
            DockhandError::IoError(_) | DockhandError::FileSystemError(_) => {
                ErrorKind::FileSystem
            }
            DockhandError::QueueError(_)
            | DockhandError::ConfigError(_)
            | DockhandError::ServerError(_)
            | DockhandError::ShutdownError(_)
            | DockhandError::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    /// Rebuild an error of `kind` carrying `message`
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Validation => DockhandError::ValidationError(message),
            ErrorKind::NotFound => DockhandError::NotFound(message),
            ErrorKind::Execution => DockhandError::ExecutionError(message),
            ErrorKind::Timeout => DockhandError::Timeout(message),
            ErrorKind::FileSystem => DockhandError::FileSystemError(message),
            ErrorKind::Infrastructure => DockhandError::Internal(message),
        }
    }

    /// The error text without its category prefix
    pub fn detail(&self) -> String {
        match self {
            DockhandError::QueueError(m)
            | DockhandError::ValidationError(m)
            | DockhandError::NotFound(m)
            | DockhandError::ExecutionError(m)
            | DockhandError::Timeout(m)
            | DockhandError::FileSystemError(m)
            | DockhandError::ConfigError(m)
            | DockhandError::InvalidTransition(m)
            | DockhandError::ServerError(m)
            | DockhandError::ShutdownError(m)
            | DockhandError::Internal(m) => m.clone(),
            other => other.to_string(),
        }
    }

    /// Message safe to show to end users. The raw error stays in operator logs.
    pub fn user_message(&self) -> String {
        user_message(self.kind())
    }
}

/// Generic user-facing message for an error kind
pub fn user_message(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::Validation => "The request is invalid. Check the submitted values.",
        ErrorKind::NotFound => "The requested app or file could not be found.",
        ErrorKind::Execution => "The operation failed. See the server logs for details.",
        ErrorKind::Timeout => {
            "The operation is taking longer than expected. It may still complete in the background."
        }
        ErrorKind::FileSystem => "A file operation failed. Check disk space and permissions.",
        ErrorKind::Infrastructure => "An internal error occurred. Please try again later.",
    }
    .to_string()
}
