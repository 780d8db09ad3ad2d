//! Embedding provider error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("{provider} requires an API key")]
    MissingApiKey { provider: &'static str },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {provider}: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
