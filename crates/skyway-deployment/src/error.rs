//! Deployment error types

use skyway_platform::{sanitize_message, PlatformError};
use skyway_types::{DeploymentOutput, ErrorKind};
use std::time::Duration;
use thiserror::Error;

/// Deployment errors
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid platform state: {message} (candidates: {})", .candidates.join(", "))]
    InvalidPlatformState {
        message: String,
        candidates: Vec<String>,
    },

    #[error("Platform API error: {0}")]
    PlatformApi(String),

    #[error("Timeout after {}s waiting for {operation}", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("Working directory error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeploymentError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        DeploymentError::InvalidArgument(message.into())
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        DeploymentError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Error class reported to callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeploymentError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DeploymentError::InvalidPlatformState { .. } => ErrorKind::InvalidPlatformState,
            DeploymentError::Timeout { .. } => ErrorKind::Timeout,
            DeploymentError::PlatformApi(_)
            | DeploymentError::Io(_)
            | DeploymentError::Internal(_) => ErrorKind::PlatformApiError,
        }
    }

    /// Message with secrets scrubbed
    pub fn sanitized(&self, secrets: &[&str]) -> String {
        sanitize_message(&self.to_string(), secrets)
    }
}

impl From<PlatformError> for DeploymentError {
    fn from(err: PlatformError) -> Self {
        DeploymentError::PlatformApi(sanitize_message(&err.to_string(), &[]))
    }
}

impl From<std::io::Error> for DeploymentError {
    fn from(err: std::io::Error) -> Self {
        DeploymentError::Io(err.to_string())
    }
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, DeploymentError>;

/// A failed command, with whatever typed output was collected before the failure
#[derive(Debug)]
pub struct CommandFailure {
    pub error: DeploymentError,
    pub partial: Option<DeploymentOutput>,
}

impl CommandFailure {
    pub fn with_partial(error: DeploymentError, partial: DeploymentOutput) -> Self {
        Self {
            error,
            partial: Some(partial),
        }
    }
}

impl From<DeploymentError> for CommandFailure {
    fn from(error: DeploymentError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}
