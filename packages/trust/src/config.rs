//! Rotation manager configuration

use crate::{Result, SigningAlgorithm, TrustError};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default signing key lifetime in milliseconds: four hours.
pub const DEFAULT_KEY_VALIDITY_MS: i64 = 4 * 60 * 60 * 1000;

/// Longest accepted signing key lifetime, in days.
pub const MAX_KEY_VALIDITY_DAYS: i64 = 366;

/// Default number of keys kept for verification.
pub const DEFAULT_RETAINED_KEY_CAPACITY: usize = 5;

/// Settings for a [`crate::KeyRotationManager`].
///
/// Deserializes from any serde format; every field except `issuer` has a
/// default. The key lifetime is written as `key_validity_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Audience scope of the issued tokens. Must not be blank.
    pub issuer: String,

    /// Lifetime of each signing key.
    #[serde(
        rename = "key_validity_ms",
        with = "duration_millis",
        default = "default_key_validity"
    )]
    pub key_validity: Duration,

    /// Upper bound on retained keys, current key included.
    #[serde(default = "default_retained_key_capacity")]
    pub retained_key_capacity: usize,

    /// MAC algorithm for every issued key.
    #[serde(default)]
    pub algorithm: SigningAlgorithm,
}

fn default_key_validity() -> Duration {
    Duration::milliseconds(DEFAULT_KEY_VALIDITY_MS)
}

fn default_retained_key_capacity() -> usize {
    DEFAULT_RETAINED_KEY_CAPACITY
}

/// Serde adapter storing a `chrono::Duration` as whole milliseconds.
mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        i64::try_from(millis)
            .ok()
            .and_then(Duration::try_milliseconds)
            .ok_or_else(|| {
                de::Error::custom(format!("key validity of {millis} ms is out of range"))
            })
    }
}

impl RotationConfig {
    /// Defaults for everything but the issuer.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            key_validity: default_key_validity(),
            retained_key_capacity: DEFAULT_RETAINED_KEY_CAPACITY,
            algorithm: SigningAlgorithm::default(),
        }
    }

    /// Set the key lifetime. Checked by [`RotationConfig::validate`].
    #[must_use]
    pub fn with_key_validity(mut self, validity: Duration) -> Self {
        self.key_validity = validity;
        self
    }

    /// Set the retained key capacity.
    #[must_use]
    pub fn with_retained_key_capacity(mut self, capacity: usize) -> Self {
        self.retained_key_capacity = capacity;
        self
    }

    /// Set the MAC algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Key lifetime.
    #[must_use]
    pub fn key_validity(&self) -> Duration {
        self.key_validity
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidArgument`] for a blank issuer, a validity
    /// that is not positive or longer than [`MAX_KEY_VALIDITY_DAYS`], or a
    /// zero capacity.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(TrustError::invalid_argument(
                "issuer must not be empty or whitespace",
            ));
        }
        if self.key_validity <= Duration::zero() {
            return Err(TrustError::invalid_argument(
                "key validity must be a positive duration",
            ));
        }
        if self.key_validity > Duration::days(MAX_KEY_VALIDITY_DAYS) {
            return Err(TrustError::invalid_argument(format!(
                "key validity must not exceed {MAX_KEY_VALIDITY_DAYS} days"
            )));
        }
        if self.retained_key_capacity == 0 {
            return Err(TrustError::invalid_argument(
                "retained key capacity must be at least 1",
            ));
        }
        Ok(())
    }
}
