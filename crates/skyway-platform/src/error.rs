//! Platform error types

use crate::client::PlatformOperation;
use thiserror::Error;

/// Errors raised by a target platform
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Application name already taken: {0}")]
    NameTaken(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Authentication failed for {username} at {endpoint}")]
    Authentication { username: String, endpoint: String },

    #[error("Target {organization}/{space} is not available")]
    UnknownTarget { organization: String, space: String },

    #[error("{operation} failed: {message}")]
    Api {
        operation: PlatformOperation,
        message: String,
    },
}

impl PlatformError {
    pub fn api(operation: PlatformOperation, message: impl Into<String>) -> Self {
        PlatformError::Api {
            operation,
            message: message.into(),
        }
    }
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;
