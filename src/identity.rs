//! Caller identity.
//!
//! The auth layer supplies an identity string when the caller is signed in.
//! When it does not, a display name typed by the caller can stand in for
//! that one call, if the policy allows it. Guest identities live under a
//! `guest:` prefix so they never match an authenticated one.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted identity, in characters.
const MAX_IDENTITY_LEN: usize = 64;

/// Prefix of every identity built from a display name.
pub const GUEST_PREFIX: &str = "guest:";

/// Resolved identity of the caller of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerId {
    name: String,
    guest: bool,
}

impl CallerId {
    /// An identity vouched for by the auth layer.
    pub fn authenticated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guest: false,
        }
    }

    /// The identity as stored on sessions and claims.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The name without the guest prefix.
    pub fn display_name(&self) -> &str {
        self.name.strip_prefix(GUEST_PREFIX).unwrap_or(&self.name)
    }

    /// Whether this identity came from an unverified display name.
    pub fn is_guest(&self) -> bool {
        self.guest
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Whether unauthenticated callers may act under a self-chosen display name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Accept a display name when no authenticated identity is present.
    #[default]
    AllowGuestNames,
    /// Every call needs an authenticated identity.
    RequireAuthenticated,
}

impl IdentityPolicy {
    /// Resolve the identity for one call.
    ///
    /// An authenticated identity always wins over a display name.
    pub fn resolve(self, authenticated: Option<&str>, display_name: Option<&str>) -> Result<CallerId> {
        if let Some(name) = non_blank(authenticated) {
            if name.starts_with(GUEST_PREFIX) {
                return Err(Error::InvalidInput(format!(
                    "identity may not start with {GUEST_PREFIX:?}"
                )));
            }
            return Ok(CallerId {
                name: validate(name)?,
                guest: false,
            });
        }

        match (self, non_blank(display_name)) {
            (IdentityPolicy::AllowGuestNames, Some(name)) => Ok(CallerId {
                name: format!("{GUEST_PREFIX}{}", validate(name)?),
                guest: true,
            }),
            (IdentityPolicy::RequireAuthenticated, Some(_)) => Err(Error::Unauthorized(
                "guest names are not accepted; sign in first".to_string(),
            )),
            (_, None) => Err(Error::Unauthorized("no caller identity supplied".to_string())),
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn validate(name: &str) -> Result<String> {
    if name.chars().count() > MAX_IDENTITY_LEN {
        return Err(Error::InvalidInput(format!(
            "identity longer than {MAX_IDENTITY_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::InvalidInput(
            "identity contains control characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_identity_wins() {
        let id = IdentityPolicy::AllowGuestNames
            .resolve(Some("zeynep"), Some("Guest"))
            .unwrap();
        assert_eq!(id.as_str(), "zeynep");
        assert!(!id.is_guest());
    }

    #[test]
    fn guest_name_accepted_when_allowed() {
        let id = IdentityPolicy::AllowGuestNames
            .resolve(None, Some("  Hatice "))
            .unwrap();
        assert_eq!(id.as_str(), "guest:Hatice");
        assert_eq!(id.display_name(), "Hatice");
        assert!(id.is_guest());
    }

    #[test]
    fn guest_never_matches_authenticated_name() {
        let guest = IdentityPolicy::AllowGuestNames
            .resolve(None, Some("ali"))
            .unwrap();
        assert_ne!(guest, CallerId::authenticated("ali"));
        assert_ne!(guest.as_str(), "ali");
    }

    #[test]
    fn authenticated_name_cannot_borrow_guest_prefix() {
        let err = IdentityPolicy::AllowGuestNames
            .resolve(Some("guest:ali"), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn guest_name_rejected_when_required() {
        let err = IdentityPolicy::RequireAuthenticated
            .resolve(None, Some("Hatice"))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let err = IdentityPolicy::AllowGuestNames
            .resolve(Some(" "), None)
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn overlong_identity_is_invalid() {
        let long = "x".repeat(65);
        let err = IdentityPolicy::AllowGuestNames
            .resolve(Some(&long), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
