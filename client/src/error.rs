//! Error types for the keysync client.

use thiserror::Error;

/// Failures of the channel to the hub.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    Closed,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("request timed out")]
    Timeout,
}

/// All possible errors from the keysync client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no key selector configured")]
    MissingKeySelector,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("remote dispatch of {command} failed: {message}")]
    RemoteDispatch { command: String, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("engine error: {0}")]
    Engine(#[from] keysync_engine::Error),

    #[error("cache has been disposed")]
    Disposed,
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
