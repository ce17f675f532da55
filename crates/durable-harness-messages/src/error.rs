//! Message construction errors.

use thiserror::Error;

/// Error building or decoding a synthetic message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Failed to read body: {0}")]
    Body(String),
    #[error("Body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
