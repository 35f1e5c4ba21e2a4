//! Error types for the verge edge delivery cache.
//!
//! This module provides a unified error type [`VergeError`] for all verge
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Delivery**: resource lookup and signed-URL failures
//! - **Origin**: network and upstream availability errors
//! - **Configuration**: invalid settings or missing configuration
//!
//! Every error maps to a terminal HTTP status via [`VergeError::to_status`];
//! response bodies carry only a short message, never internals.

use std::io;
use thiserror::Error;

/// Main error type for verge operations.
#[derive(Error, Debug)]
pub enum VergeError {
    // Delivery errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signed URL expired")]
    Expired,

    // Origin errors
    #[error("Origin unavailable: {0}")]
    OriginUnavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VergeError {
    /// Map to the terminal HTTP status code for this error.
    pub fn to_status(&self) -> u16 {
        match self {
            VergeError::NotFound(_) => 404,
            VergeError::InvalidSignature | VergeError::Expired => 403,
            VergeError::OriginUnavailable(_) => 502,
            _ => 500,
        }
    }

    /// Short, client-safe message for the structured error body.
    pub fn client_message(&self) -> String {
        match self {
            VergeError::NotFound(_) => "not found".to_string(),
            VergeError::InvalidSignature => "invalid signature".to_string(),
            VergeError::Expired => "signed url expired".to_string(),
            VergeError::OriginUnavailable(_) => "origin unavailable".to_string(),
            _ => "internal error".to_string(),
        }
    }

    /// Check if error is retryable by an external caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VergeError::OriginUnavailable(_) | VergeError::Network(_) | VergeError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for VergeError {
    fn from(e: serde_json::Error) -> Self {
        VergeError::Serialization(e.to_string())
    }
}

/// Result type alias for verge operations.
pub type Result<T> = std::result::Result<T, VergeError>;
