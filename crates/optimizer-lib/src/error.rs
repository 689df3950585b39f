//! Error types shared by the runbooks

use thiserror::Error;

/// Errors raised while fetching metrics, talking to the control plane or
/// applying an optimization
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Credential acquisition failed; aborts the whole run
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("metrics query for {resource} failed: {message}")]
    Metrics { resource: String, message: String },

    /// Non-success HTTP status from the provider API
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The power-state poll exhausted its attempts before the VM deallocated
    #[error("{resource} did not reach the deallocated state after {attempts} polls")]
    DeallocationTimedOut { resource: String, attempts: u32 },

    #[error("unknown configuration '{0}'")]
    UnknownConfiguration(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("inventory error: {0}")]
    Inventory(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl OptimizerError {
    /// Whether the error must abort the run instead of being recorded
    /// against a single resource
    pub fn is_fatal(&self) -> bool {
        matches!(self, OptimizerError::Authentication(_) | OptimizerError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
