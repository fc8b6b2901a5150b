//! Error types for Voice Studio

use thiserror::Error;

/// Result type alias for Voice Studio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Voice Studio
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access refused or no input device available
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Streaming session failed to open or failed mid-session
    #[error("connection error: {0}")]
    Connection(String),

    /// Send attempted on a session that is not open
    #[error("session not open (state: {0})")]
    NotOpen(String),

    /// Malformed audio chunk
    #[error("decode error: {0}")]
    Decode(String),

    /// Audio could not be encoded
    #[error("encode error: {0}")]
    Encode(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Request/response API error
    #[error("api error: {0}")]
    Api(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
