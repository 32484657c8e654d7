//! Image factory client errors

use thiserror::Error;

/// Errors that can occur when interacting with the image factory API
#[derive(Debug, Error)]
pub enum FactoryError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Image factory API returned an error
    #[error("image factory API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., missing required fields)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
