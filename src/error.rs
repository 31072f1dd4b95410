//! Error types for the session context core

use crate::endpoint::EndpointError;
use crate::file_queue::FileQueueError;
use crate::session::StoreError;
use thiserror::Error;

/// Crate-wide error.
///
/// Only `ProtocolViolation` reflects a caller bug. Drift in the call/result
/// protocol is repaired and logged, and budget problems surface as outcome
/// values, so neither appears here.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Model endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("File queue error: {0}")]
    FileQueue(#[from] FileQueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
