//! Outbox error types.

use crate::EventId;
use thiserror::Error;

/// Error raised by an [`EventStore`](crate::EventStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Update targeted an entry that is no longer held
    #[error("Event not found: {0}")]
    NotFound(EventId),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row contents could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Delivery failure reported by an [`Emitter`](crate::Emitter).
///
/// A transport failure never carries a response; a status failure always
/// does. The two are checked independently.
#[derive(Error, Debug)]
pub enum EmitError {
    /// Connection, TLS or timeout failure before a response was read.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Collector answered with a status above 299.
    #[error("Collector rejected request: {status} - {body}")]
    Status {
        /// HTTP status code returned by the collector.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Result type alias using EmitError.
pub type EmitResult<T> = Result<T, EmitError>;

/// Reason an event was rejected by strict validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Payload has no bytes.
    #[error("event payload is empty")]
    Empty,

    /// Payload is not valid JSON.
    #[error("event payload is not valid JSON: {0}")]
    NotJson(String),

    /// Payload is JSON but not an object.
    #[error("event payload is not a JSON object")]
    NotAnObject,

    /// A required top-level field is absent or null.
    #[error("event is missing required field `{0}`")]
    MissingField(String),
}

/// Error surfaced to producers and to the owner of an outbox client.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store error outside the dispatcher loop (construction, recovery)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-blocking enqueue found the ingestion queue at capacity.
    #[error("Outbox queue is full")]
    QueueFull,

    /// The dispatcher loop has stopped; nothing more is accepted.
    #[error("Outbox is closed")]
    Closed,
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
