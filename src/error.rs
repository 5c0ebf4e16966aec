//! Error types for the Teztaom client

use thiserror::Error;

/// Boxed error produced by a transport implementation
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network-level failure: timeout, connection reset, DNS failure
    #[error("Transport failure: {0}")]
    Transport(#[source] BoxError),

    /// The auth service explicitly rejected the credentials
    #[error("Authentication rejected with status {status}: {body}")]
    AuthRejected { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The request is still unauthorized after refresh was impossible or exhausted
    #[error("Unauthorized")]
    Unauthorized,

    #[error("API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Build a transport failure from any message or error
    pub fn transport(err: impl Into<BoxError>) -> Self {
        ClientError::Transport(err.into())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
