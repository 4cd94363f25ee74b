//! Error types for the provisioning core

use std::time::Duration;
use thiserror::Error;

/// Provisioning result type
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that can occur while provisioning droplets
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// DigitalOcean API rejected a request
    #[error("DigitalOcean API error ({status}): {message}")]
    Api {
        /// HTTP status code returned by the API
        status: u16,
        /// Error message from the API response body
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Droplet not found
    #[error("Droplet {0} not found")]
    DropletNotFound(u64),

    /// Timeout waiting for a droplet to become reachable
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A spawned provisioning task failed or was cancelled
    #[error("Provisioning task failed: {0}")]
    Task(String),
}

impl ProvisionError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an API error
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a task error
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }
}
