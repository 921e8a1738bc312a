//! Client credential matching.
//!
//! A caller presents a [`ClientCredentialRequest`] carrying whichever of the
//! client id, client secret and redirect URI it knows. An external store has
//! already resolved a [`ClientCredentialRecord`]. [`ClientCredentialMatcher`]
//! checks the presented fields against the record, in that order, and stops at
//! the first mismatch. Fields the caller left unset are not checked.
//!
//! | field           | comparison                          |
//! |-----------------|-------------------------------------|
//! | `client_id`     | byte-exact                          |
//! | `client_secret` | byte-exact, constant time           |
//! | `redirect_uri`  | case-insensitive                    |

use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Fields a client presented. `None` means "do not check".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentialRequest {
    /// Claimed client identifier
    pub client_id: Option<String>,
    /// Presented client secret
    pub client_secret: Option<String>,
    /// Requested redirect target
    pub redirect_uri: Option<String>,
}

impl ClientCredentialRequest {
    /// Request that checks nothing until fields are added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Check the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Check the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }
}

impl fmt::Debug for ClientCredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialRequest")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// A registered client as returned by the lookup that precedes validation.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentialRecord {
    /// Registered client identifier
    pub client_id: Option<String>,
    /// Registered client secret
    pub client_secret: Option<String>,
    /// Registered redirect target
    pub redirect_uri: Option<String>,
}

impl ClientCredentialRecord {
    /// Record with all three fields set.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            redirect_uri: Some(redirect_uri.into()),
        }
    }
}

impl fmt::Debug for ClientCredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialRecord")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Credential field that caused a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialField {
    /// `client_id`
    ClientId,
    /// `client_secret`
    ClientSecret,
    /// `redirect_uri`
    RedirectUri,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientId => "client_id",
            Self::ClientSecret => "client_secret",
            Self::RedirectUri => "redirect_uri",
        })
    }
}

/// Terminal state of a validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    /// Every presented field matched.
    Validated,
    /// The named field did not match.
    Rejected(CredentialField),
}

/// Result of one validation attempt. Immutable; validate again for a new
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    resolved_record: ClientCredentialRecord,
    state: ValidationState,
}

impl ValidationOutcome {
    /// The record that was validated against, whatever the result.
    #[must_use]
    pub fn resolved_record(&self) -> &ClientCredentialRecord {
        &self.resolved_record
    }

    /// Whether every presented field matched.
    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.state == ValidationState::Validated
    }

    /// Terminal state.
    #[must_use]
    pub fn state(&self) -> ValidationState {
        self.state
    }

    /// Field that failed, if the attempt was rejected.
    #[must_use]
    pub fn rejected_field(&self) -> Option<CredentialField> {
        match self.state {
            ValidationState::Validated => None,
            ValidationState::Rejected(field) => Some(field),
        }
    }

    /// Take ownership of the resolved record.
    #[must_use]
    pub fn into_resolved_record(self) -> ClientCredentialRecord {
        self.resolved_record
    }
}

/// Stateless matcher; cheap to copy and safe to share.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCredentialMatcher;

impl ClientCredentialMatcher {
    /// New matcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Check `requested` against `resolved`.
    ///
    /// Order is client id, client secret, redirect URI; the first mismatch
    /// rejects. A field set in the request but missing from the record is a
    /// mismatch. Never fails: rejection is a normal outcome.
    #[must_use]
    pub fn validate(
        &self,
        requested: &ClientCredentialRequest,
        resolved: ClientCredentialRecord,
    ) -> ValidationOutcome {
        let state = match first_mismatch(requested, &resolved) {
            None => ValidationState::Validated,
            Some(field) => {
                tracing::debug!(
                    "Client credential rejected: {field} mismatch (client_id: {})",
                    resolved.client_id.as_deref().unwrap_or("<none>")
                );
                ValidationState::Rejected(field)
            }
        };

        ValidationOutcome {
            resolved_record: resolved,
            state,
        }
    }
}

fn first_mismatch(
    requested: &ClientCredentialRequest,
    resolved: &ClientCredentialRecord,
) -> Option<CredentialField> {
    if !field_matches(&requested.client_id, &resolved.client_id, ordinal_eq) {
        return Some(CredentialField::ClientId);
    }
    if !field_matches(
        &requested.client_secret,
        &resolved.client_secret,
        constant_time_eq,
    ) {
        return Some(CredentialField::ClientSecret);
    }
    if !field_matches(
        &requested.redirect_uri,
        &resolved.redirect_uri,
        case_insensitive_eq,
    ) {
        return Some(CredentialField::RedirectUri);
    }
    None
}

fn field_matches(
    requested: &Option<String>,
    resolved: &Option<String>,
    eq: fn(&str, &str) -> bool,
) -> bool {
    match (requested, resolved) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(requested), Some(resolved)) => eq(requested, resolved),
    }
}

fn ordinal_eq(a: &str, b: &str) -> bool {
    a.as_bytes() == b.as_bytes()
}

// Only the length is observable through timing.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn case_insensitive_eq(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        return a.eq_ignore_ascii_case(b);
    }
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}
