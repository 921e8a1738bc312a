//! Error types for the trust core

use thiserror::Error;

/// Errors raised by key rotation and manager construction.
///
/// Credential matching never fails; a mismatch is reported through
/// [`crate::ValidationOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    /// Construction input was rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Key material or key identifier could not be generated
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key material was rejected by the MAC implementation.
    ///
    /// HMAC accepts keys of any length, so none of the algorithms in this
    /// crate raise it today. Kept so `sign` stays fallible if a MAC with
    /// fixed key sizes is added.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl TrustError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a key generation error
    pub fn key_generation(msg: impl Into<String>) -> Self {
        Self::KeyGeneration(msg.into())
    }

    /// Create an invalid key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }
}

/// Result type for trust operations
pub type Result<T> = std::result::Result<T, TrustError>;
