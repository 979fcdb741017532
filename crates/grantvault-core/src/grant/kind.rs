//! Grant types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// OAuth 2.0 grant type a grant was created for.
///
/// The persisted discriminant is the `grant_type` parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Implicit flow (tokens returned from the authorization endpoint).
    Implicit,
    /// Client Credentials flow, no resource owner.
    ClientCredentials,
    /// Resource Owner Password Credentials flow.
    ResourceOwnerPasswordCredentials,
}

impl GrantKind {
    /// Returns the OAuth 2.0 `grant_type` parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Implicit => "implicit",
            Self::ClientCredentials => "client_credentials",
            Self::ResourceOwnerPasswordCredentials => "password",
        }
    }

    /// Parses a persisted discriminant. Unknown values yield `None`.
    #[must_use]
    pub fn from_grant_type(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "implicit" => Some(Self::Implicit),
            "client_credentials" => Some(Self::ClientCredentials),
            "password" | "resource_owner_password_credentials" => {
                Some(Self::ResourceOwnerPasswordCredentials)
            }
            _ => None,
        }
    }

    /// Whether grants of this kind act on behalf of a resource owner.
    #[must_use]
    pub fn has_resource_owner(&self) -> bool {
        !matches!(self, Self::ClientCredentials)
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_type_round_trip() {
        for kind in [
            GrantKind::AuthorizationCode,
            GrantKind::Implicit,
            GrantKind::ClientCredentials,
            GrantKind::ResourceOwnerPasswordCredentials,
        ] {
            assert_eq!(GrantKind::from_grant_type(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_grant_type() {
        assert_eq!(GrantKind::from_grant_type("device_code"), None);
        assert_eq!(GrantKind::from_grant_type(""), None);
    }
}
