//! Rotating signing-key manager.
//!
//! [`KeyRotationManager`] hands out the signing credential to use right now and
//! the set of keys a verifier should still accept. Keys are generated lazily:
//! the first request, or the first request after the current key expires,
//! rotates in a fresh key. At most `retained_key_capacity` keys are kept; the
//! one that expires first is dropped when a rotation overflows the ring.
//!
//! A single `tokio::sync::RwLock` guards the ring. Lookups share the read
//! lock, rotations take the write lock. The decision to rotate is made under
//! the read lock and re-checked once the write lock is held, so callers racing
//! on an expired key usually share one rotation. When they don't, the extra
//! key is simply retained and later evicted.

use crate::clock::{Clock, SystemClock};
use crate::config::RotationConfig;
use crate::entropy::{EntropySource, SystemEntropy};
use crate::keys::{KeyId, SigningAlgorithm, SigningCredential, SigningKey, VerificationToken};
use crate::{Result, TrustError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Fresh identifiers drawn before giving up on a collision-free one.
const MAX_KEY_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotationReason {
    /// No current key, or it expired.
    Expired,
    /// Caller asked for a new key regardless of expiry.
    Forced,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => f.write_str("expired"),
            Self::Forced => f.write_str("forced"),
        }
    }
}

/// Retained keys plus the id of the one currently used for signing.
///
/// `current`, when set, always names an entry of `keys`.
#[derive(Debug, Default)]
struct KeyRing {
    keys: HashMap<KeyId, SigningKey>,
    current: Option<KeyId>,
}

impl KeyRing {
    fn current(&self) -> Option<&SigningKey> {
        self.current.and_then(|id| self.keys.get(&id))
    }

    fn current_valid_at(&self, now: DateTime<Utc>) -> Option<&SigningKey> {
        self.current().filter(|key| !key.is_expired_at(now))
    }

    /// Insert `key` as current, then evict until the ring fits `capacity`.
    /// Returns the evicted ids in eviction order.
    fn install(&mut self, key: SigningKey, capacity: usize) -> Vec<KeyId> {
        let key_id = key.key_id();
        self.keys.insert(key_id, key);
        self.current = Some(key_id);

        let mut evicted = Vec::new();
        while self.keys.len() > capacity {
            let Some(victim) = self.eviction_candidate() else {
                break;
            };
            // Dropping the key zeroizes its material.
            self.keys.remove(&victim);
            evicted.push(victim);
        }
        evicted
    }

    /// Earliest expiry first, lowest id on ties. Never the current key.
    fn eviction_candidate(&self) -> Option<KeyId> {
        self.keys
            .values()
            .filter(|key| Some(key.key_id()) != self.current)
            .min_by_key(|key| (key.expires_on(), key.key_id()))
            .map(SigningKey::key_id)
    }

    fn sorted_keys(&self) -> Vec<&SigningKey> {
        let mut keys: Vec<&SigningKey> = self.keys.values().collect();
        keys.sort_by_key(|key| (key.expires_on(), key.key_id()));
        keys
    }
}

/// Issues, rotates and retires symmetric signing keys.
///
/// Share it behind an `Arc`; every method takes `&self` and is safe to call
/// from many tasks at once.
///
/// # Example
///
/// ```rust
/// use cryypt_trust::KeyRotationManager;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = KeyRotationManager::new("https://auth.example.com")?;
///
/// let credential = manager.current_signing_credential().await?;
/// let tag = credential.sign(b"header.payload")?;
///
/// let verifiers = manager.all_verification_tokens().await;
/// let token = verifiers
///     .iter()
///     .find(|t| t.key_id() == credential.key_id())
///     .ok_or("signing key not retained")?;
/// assert!(token.verify(b"header.payload", &tag));
/// # Ok(())
/// # }
/// ```
pub struct KeyRotationManager {
    config: RotationConfig,
    ring: RwLock<KeyRing>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
}

impl KeyRotationManager {
    /// Manager with a four hour key lifetime, the system clock and system
    /// entropy.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidArgument`] if `issuer` is empty or only
    /// whitespace.
    pub fn new(issuer: impl Into<String>) -> Result<Self> {
        Self::builder(issuer).build()
    }

    /// Manager with a custom key lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidArgument`] for a blank issuer or a
    /// lifetime that is not positive or longer than
    /// [`crate::MAX_KEY_VALIDITY_DAYS`].
    pub fn with_validity(issuer: impl Into<String>, key_validity: Duration) -> Result<Self> {
        Self::builder(issuer).key_validity(key_validity).build()
    }

    /// Manager from a full configuration and injected collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidArgument`] if the configuration does not
    /// validate.
    pub fn with_config(
        config: RotationConfig,
        clock: Arc<dyn Clock>,
        entropy: Arc<dyn EntropySource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ring: RwLock::new(KeyRing::default()),
            clock,
            entropy,
        })
    }

    /// Start building a manager for `issuer`.
    pub fn builder(issuer: impl Into<String>) -> KeyRotationManagerBuilder {
        KeyRotationManagerBuilder::new(issuer)
    }

    /// Issuer this manager signs for.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// The credential to sign with now.
    ///
    /// May mutate the key set: when there is no current key, or the current
    /// key's expiry is at or before the clock's `now`, a new key is generated,
    /// made current, and the ring is trimmed to capacity before the
    /// credential is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::KeyGeneration`] if the entropy source fails. The
    /// ring is left exactly as it was, so an earlier key stays available to
    /// verifiers.
    pub async fn current_signing_credential(&self) -> Result<SigningCredential> {
        let now = self.clock.now();
        {
            let ring = self.ring.read().await;
            if let Some(key) = ring.current_valid_at(now) {
                return Ok(key.credential());
            }
        }
        self.rotate(RotationReason::Expired).await
    }

    /// Rotate in a new current key even if the existing one is still valid.
    ///
    /// # Errors
    ///
    /// Same as [`KeyRotationManager::current_signing_credential`].
    pub async fn force_rotate(&self) -> Result<SigningCredential> {
        self.rotate(RotationReason::Forced).await
    }

    /// Every retained key, ordered by expiry then id. Never rotates.
    pub async fn all_verification_tokens(&self) -> Vec<VerificationToken> {
        let ring = self.ring.read().await;
        ring.sorted_keys()
            .into_iter()
            .map(SigningKey::verification_token)
            .collect()
    }

    /// The retained key with id `key_id`, if any.
    pub async fn verification_token(&self, key_id: &KeyId) -> Option<VerificationToken> {
        let ring = self.ring.read().await;
        ring.keys.get(key_id).map(SigningKey::verification_token)
    }

    /// Id of the current signing key, without rotating.
    pub async fn current_key_id(&self) -> Option<KeyId> {
        self.ring.read().await.current
    }

    /// Number of retained keys.
    pub async fn retained_key_count(&self) -> usize {
        self.ring.read().await.keys.len()
    }

    async fn rotate(&self, reason: RotationReason) -> Result<SigningCredential> {
        let algorithm = self.config.algorithm;
        let material = self
            .entropy
            .generate_bytes(algorithm.key_len())
            .inspect_err(|e| {
                tracing::error!("Signing key rotation for {} failed: {e}", self.config.issuer);
            })?;

        let mut ring = self.ring.write().await;
        let now = self.clock.now();

        if reason == RotationReason::Expired
            && let Some(key) = ring.current_valid_at(now)
        {
            tracing::debug!(
                "Signing key {} installed by a concurrent rotation, reusing it",
                key.key_id()
            );
            return Ok(key.credential());
        }

        let key_id = self.fresh_key_id(&ring).inspect_err(|e| {
            tracing::error!("Signing key rotation for {} failed: {e}", self.config.issuer);
        })?;
        let expires_on = now.checked_add_signed(self.config.key_validity()).ok_or_else(|| {
            TrustError::key_generation("key expiry is outside the representable time range")
        })?;

        let key = SigningKey::new(key_id, algorithm, material, expires_on);
        let credential = key.credential();
        let evicted = ring.install(key, self.config.retained_key_capacity);

        tracing::info!(
            key_id = %key_id,
            %expires_on,
            retained = ring.keys.len(),
            "Rotated signing key for {} ({reason})",
            self.config.issuer
        );
        for victim in evicted {
            tracing::debug!(key_id = %victim, "Evicted retired signing key");
        }

        Ok(credential)
    }

    fn fresh_key_id(&self, ring: &KeyRing) -> Result<KeyId> {
        for _ in 0..MAX_KEY_ID_ATTEMPTS {
            let mut bytes = [0u8; 16];
            self.entropy.fill(&mut bytes)?;
            let candidate = KeyId::from_random_bytes(bytes);
            if !ring.keys.contains_key(&candidate) {
                return Ok(candidate);
            }
            tracing::warn!("Generated key id {candidate} collides with a retained key, retrying");
        }
        Err(TrustError::key_generation(format!(
            "no unique key id after {MAX_KEY_ID_ATTEMPTS} attempts"
        )))
    }
}

impl fmt::Debug for KeyRotationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRotationManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`KeyRotationManager`].
#[must_use]
pub struct KeyRotationManagerBuilder {
    config: RotationConfig,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
}

impl KeyRotationManagerBuilder {
    /// Defaults: four hour keys, five retained, HS256, system clock and entropy.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            config: RotationConfig::new(issuer),
            clock: Arc::new(SystemClock),
            entropy: Arc::new(SystemEntropy),
        }
    }

    /// Lifetime of each key.
    pub fn key_validity(mut self, validity: Duration) -> Self {
        self.config = self.config.with_key_validity(validity);
        self
    }

    /// Maximum number of retained keys.
    pub fn retained_key_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_retained_key_capacity(capacity);
        self
    }

    /// MAC algorithm.
    pub fn algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.config = self.config.with_algorithm(algorithm);
        self
    }

    /// Time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Randomness for key material and ids.
    pub fn entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidArgument`] if the configuration does not
    /// validate.
    pub fn build(self) -> Result<KeyRotationManager> {
        KeyRotationManager::with_config(self.config, self.clock, self.entropy)
    }
}
