//! Randomness for key material and key identifiers
//!
//! All random bytes the rotation manager consumes come through an
//! [`EntropySource`]. The default [`SystemEntropy`] reads the operating
//! system CSPRNG; failures are reported instead of falling back to a weaker
//! generator.

use crate::{Result, TrustError};
use zeroize::Zeroizing;

/// Cryptographically secure source of random bytes.
pub trait EntropySource: Send + Sync + 'static {
    /// Fill `dest` entirely with random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::KeyGeneration`] when the source is unavailable.
    /// On error the contents of `dest` are unspecified.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;

    /// Allocate a zeroize-on-drop buffer of `len` random bytes.
    ///
    /// # Errors
    ///
    /// Propagates failures from [`EntropySource::fill`].
    fn generate_bytes(&self, len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let mut bytes = Zeroizing::new(vec![0u8; len]);
        self.fill(&mut bytes)?;
        Ok(bytes)
    }
}

/// Operating system CSPRNG via `getrandom`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEntropy;

impl EntropySource for SystemEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        getrandom::fill(dest).map_err(|e| {
            TrustError::key_generation(format!("system entropy source unavailable: {e}"))
        })
    }
}

impl<E: EntropySource + ?Sized> EntropySource for std::sync::Arc<E> {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        (**self).fill(dest)
    }
}
