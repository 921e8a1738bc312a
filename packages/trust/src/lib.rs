//! # Cryypt Trust
//!
//! Credential trust primitives for an identity layer that issues its own
//! tokens.
//!
//! ## Features
//!
//! - **Key Rotation**: lazily rotated HMAC signing keys with bounded history
//!   ([`KeyRotationManager`])
//! - **Verification Keys**: owned snapshots of every retained key for token
//!   verifiers ([`VerificationToken`])
//! - **Client Matching**: partial client credential checks against a looked-up
//!   record ([`ClientCredentialMatcher`])
//! - **Injectable Time and Entropy**: [`Clock`] and [`EntropySource`] for
//!   deterministic tests
//!
//! No I/O happens here. Token encoding, client storage and the request
//! pipeline belong to the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use cryypt_trust::{
//!     ClientCredentialMatcher, ClientCredentialRecord, ClientCredentialRequest,
//!     KeyRotationManager,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = KeyRotationManager::new("https://auth.example.com")?;
//! let credential = keys.current_signing_credential().await?;
//! assert_eq!(credential.algorithm().as_str(), "HS256");
//!
//! let record = ClientCredentialRecord::new("web", "s3cr3t", "https://app.example.com/cb");
//! let request = ClientCredentialRequest::new()
//!     .with_client_id("web")
//!     .with_redirect_uri("HTTPS://APP.EXAMPLE.COM/cb");
//! let outcome = ClientCredentialMatcher::new().validate(&request, record);
//! assert!(outcome.is_validated());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod clock;
pub mod config;
pub mod entropy;
pub mod error;
pub mod keys;
pub mod rotation;

pub use client::{
    ClientCredentialMatcher, ClientCredentialRecord, ClientCredentialRequest, CredentialField,
    ValidationOutcome, ValidationState,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_KEY_VALIDITY_MS, DEFAULT_RETAINED_KEY_CAPACITY, MAX_KEY_VALIDITY_DAYS, RotationConfig,
};
pub use entropy::{EntropySource, SystemEntropy};
pub use error::{Result, TrustError};
pub use keys::{KeyId, SigningAlgorithm, SigningCredential, VerificationToken};
pub use rotation::{KeyRotationManager, KeyRotationManagerBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ClientCredentialMatcher, ClientCredentialRecord, ClientCredentialRequest, Clock,
        EntropySource, KeyRotationManager, Result, SigningCredential, TrustError,
        VerificationToken,
    };
}
