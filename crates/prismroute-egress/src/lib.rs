//! PrismRoute Egress Connectors
//!
//! This crate talks to upstream providers:
//! - Shared HTTP client configuration
//! - PaCoRe streaming connector (OpenAI-shaped SSE in, Claude events out)

use thiserror::Error;

pub mod client;
pub mod pacore;

/// Egress-specific errors
#[derive(Debug, Error)]
pub enum EgressError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider returned an error response
    #[error("Provider error: {status_code} - {message}")]
    Provider { status_code: u16, message: String },

    /// Stream error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Egress result type
pub type Result<T> = std::result::Result<T, EgressError>;
