//! Error types for the request queue.
//!
//! # Design
//! Failures are split by who sees them. `TransportError` travels inside a
//! `Completion` to the notification sink and never stops the queue.
//! `ConfigError` and `RequestError` are returned synchronously to the caller
//! before any queued request is affected. `QueueError` is what the caller
//! gets back from enqueueing.

use thiserror::Error;

/// A single send failed. Local to one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The send did not finish within the configured timeout.
    #[error("request timed out")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("host not found")]
    HostNotFound,

    #[error("I/O error: {0}")]
    Io(String),

    /// Anything else the underlying client reported.
    #[error("transport error: {0}")]
    Other(String),
}

/// Malformed connector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("configuration must be a JSON object")]
    NotAnObject,

    #[error("configuration is not valid JSON: {0}")]
    Malformed(String),

    #[error("invalid host: {0}")]
    InvalidHost(String),

    /// The timeout was not a non-negative whole number of milliseconds.
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid event level for {event}: {value}")]
    InvalidEventLevel { event: String, value: String },
}

/// A request entity was modified in a way its lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("request body already set")]
    BodyAlreadySet,

    #[error("content type already set")]
    ContentTypeAlreadySet,

    /// Send-time state is applied exactly once, right before sending.
    #[error("request already decorated with send-time state")]
    AlreadyDecorated,
}

/// Errors returned to callers of the queue and connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue has been stopped and accepts no more requests.
    #[error("queue stopped")]
    Stopped,

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}
