//! Error types for the relay client

use thiserror::Error;

/// Errors that can occur when using the relay client
#[derive(Error, Debug)]
pub enum ClientError {
    /// The token endpoint did not produce a usable token
    #[error("Token resolution failed: {0}")]
    TokenResolution(String),

    /// The server or token endpoint URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// `connect` was called while a session is already running
    #[error("Session already active")]
    AlreadyActive,

    /// HTTP request to the token endpoint failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
