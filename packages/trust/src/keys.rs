//! Signing keys and the owned views handed out to token issuers and verifiers.
//!
//! A `SigningKey` never leaves the rotation manager. Callers receive a
//! [`SigningCredential`] (to produce signatures) or a [`VerificationToken`]
//! (to check them). Both views own a private copy of the key material that is
//! wiped when the view is dropped, and neither prints the material in its
//! `Debug` output.

use crate::{Result, TrustError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Symmetric MAC algorithm used by every key a manager issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256
    #[default]
    #[serde(rename = "HS256")]
    Hs256,
    /// HMAC with SHA-384
    #[serde(rename = "HS384")]
    Hs384,
    /// HMAC with SHA-512
    #[serde(rename = "HS512")]
    Hs512,
}

impl SigningAlgorithm {
    /// JOSE `alg` header value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
        }
    }

    /// Key length in bytes, equal to the digest output size.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Hs256 => 32,
            Self::Hs384 => 48,
            Self::Hs512 => 64,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! hmac_tag {
    ($digest:ty, $key:expr, $message:expr) => {{
        let mut mac = <Hmac<$digest> as Mac>::new_from_slice($key)
            .map_err(|e| TrustError::invalid_key(format!("HMAC key rejected: {e}")))?;
        mac.update($message);
        mac.finalize().into_bytes().to_vec()
    }};
}

macro_rules! hmac_check {
    ($digest:ty, $key:expr, $message:expr, $tag:expr) => {{
        match <Hmac<$digest> as Mac>::new_from_slice($key) {
            Ok(mut mac) => {
                mac.update($message);
                mac.verify_slice($tag).is_ok()
            }
            Err(_) => false,
        }
    }};
}

fn compute_tag(algorithm: SigningAlgorithm, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    Ok(match algorithm {
        SigningAlgorithm::Hs256 => hmac_tag!(Sha256, key, message),
        SigningAlgorithm::Hs384 => hmac_tag!(Sha384, key, message),
        SigningAlgorithm::Hs512 => hmac_tag!(Sha512, key, message),
    })
}

// verify_slice compares in constant time.
fn check_tag(algorithm: SigningAlgorithm, key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    match algorithm {
        SigningAlgorithm::Hs256 => hmac_check!(Sha256, key, message, tag),
        SigningAlgorithm::Hs384 => hmac_check!(Sha384, key, message, tag),
        SigningAlgorithm::Hs512 => hmac_check!(Sha512, key, message, tag),
    }
}

/// Unique identifier of a signing key, used as the token `kid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(Uuid);

impl KeyId {
    /// Build an identifier from 128 random bits (stamped as a v4 UUID).
    #[must_use]
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl FromStr for KeyId {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TrustError::invalid_argument(format!("malformed key id {s:?}: {e}")))
    }
}

/// A retained signing key. Immutable once constructed.
pub(crate) struct SigningKey {
    key_id: KeyId,
    algorithm: SigningAlgorithm,
    material: Zeroizing<Vec<u8>>,
    expires_on: DateTime<Utc>,
}

impl SigningKey {
    pub(crate) fn new(
        key_id: KeyId,
        algorithm: SigningAlgorithm,
        material: Zeroizing<Vec<u8>>,
        expires_on: DateTime<Utc>,
    ) -> Self {
        Self {
            key_id,
            algorithm,
            material,
            expires_on,
        }
    }

    pub(crate) fn key_id(&self) -> KeyId {
        self.key_id
    }

    pub(crate) fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    /// Expired keys are no longer used for signing; `at` equal to the expiry counts.
    pub(crate) fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_on <= at
    }

    pub(crate) fn credential(&self) -> SigningCredential {
        SigningCredential {
            algorithm: self.algorithm,
            key_id: self.key_id,
            material: self.material.clone(),
            expires_on: self.expires_on,
        }
    }

    pub(crate) fn verification_token(&self) -> VerificationToken {
        VerificationToken {
            algorithm: self.algorithm,
            key_id: self.key_id,
            material: self.material.clone(),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("material", &Redacted(self.material.len()))
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

struct Redacted(usize);

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted {} bytes>", self.0)
    }
}

/// Everything a token issuer needs to sign with the current key.
#[derive(Clone)]
pub struct SigningCredential {
    algorithm: SigningAlgorithm,
    key_id: KeyId,
    material: Zeroizing<Vec<u8>>,
    expires_on: DateTime<Utc>,
}

impl SigningCredential {
    /// MAC algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Identifier to place in the token header.
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Raw secret.
    #[must_use]
    pub fn key_material(&self) -> &[u8] {
        &self.material
    }

    /// Instant after which the manager stops signing with this key.
    #[must_use]
    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    /// Compute the MAC of `message` with this key.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidKey`] if the MAC rejects the key material.
    /// HMAC takes keys of any length, so the current algorithms always
    /// succeed.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        compute_tag(self.algorithm, &self.material, message)
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .field("material", &Redacted(self.material.len()))
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// A retained key as seen by a verifier.
#[derive(Clone)]
pub struct VerificationToken {
    algorithm: SigningAlgorithm,
    key_id: KeyId,
    material: Zeroizing<Vec<u8>>,
}

impl VerificationToken {
    /// MAC algorithm.
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Identifier a token's `kid` must match.
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Raw secret.
    #[must_use]
    pub fn key_material(&self) -> &[u8] {
        &self.material
    }

    /// Check `tag` against the MAC of `message`, in constant time.
    #[must_use]
    pub fn verify(&self, message: &[u8], tag: &[u8]) -> bool {
        check_tag(self.algorithm, &self.material, message, tag)
    }
}

impl fmt::Debug for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationToken")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .field("material", &Redacted(self.material.len()))
            .finish()
    }
}
