//! Error types for batchq-core

use thiserror::Error;

/// Main error type for the batchq-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the durable store or filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid event collection name
    #[error("invalid event collection: {0}")]
    InvalidCollection(String),

    /// Invalid event shape
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Durable store error that is not a plain IO failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Network-level transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Non-success response from the ingest service
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// The client failed to initialize properly and is inactive
    #[error("the client failed to initialize properly and is inactive")]
    Inactive,
}

/// Result type alias for batchq-core
pub type Result<T> = std::result::Result<T, Error>;
