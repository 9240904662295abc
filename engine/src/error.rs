//! Error types for the keysync engine.

use thiserror::Error;

/// All possible errors from the keysync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Codec errors
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    // Key errors
    #[error("item has no key at field '{field}'")]
    MissingKey { field: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl Error {
    pub(crate) fn deserialization(err: impl std::fmt::Display) -> Self {
        Error::Deserialization(err.to_string())
    }

    pub(crate) fn serialization(err: impl std::fmt::Display) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
