//! OAuth 2.0 client as seen by the grant core.
//!
//! Only the fields that influence token issuance are modeled here:
//! the scope allow-list, per-client lifetime overrides, the ID token
//! signing/encryption preferences and the access token format.

use serde::{Deserialize, Serialize};

/// OAuth 2.0 client registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Unique client identifier used in OAuth flows.
    pub client_id: String,

    /// Human-readable display name.
    pub name: String,

    /// OAuth scopes this client is allowed to request.
    /// Empty list means all scopes are allowed.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Access token lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_lifetime: Option<i64>,

    /// Refresh token lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_lifetime: Option<i64>,

    /// JWS algorithm requested for ID tokens (`id_token_signed_response_alg`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_signed_response_alg: Option<String>,

    /// JWE algorithm requested for ID tokens (`id_token_encrypted_response_alg`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_encrypted_response_alg: Option<String>,

    /// Issue access tokens as signed JWTs instead of opaque handles.
    #[serde(default)]
    pub access_token_as_jwt: bool,
}

impl Client {
    /// Creates a client with no overrides and an unrestricted scope list.
    #[must_use]
    pub fn new(client_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: name.into(),
            scopes: Vec::new(),
            access_token_lifetime: None,
            refresh_token_lifetime: None,
            id_token_signed_response_alg: None,
            id_token_encrypted_response_alg: None,
            access_token_as_jwt: false,
        }
    }

    /// Effective access token lifetime: the client override when positive,
    /// otherwise `default_secs`.
    #[must_use]
    pub fn effective_access_token_lifetime(&self, default_secs: i64) -> i64 {
        positive_or(self.access_token_lifetime, default_secs)
    }

    /// Effective refresh token lifetime: the client override when positive,
    /// otherwise `default_secs`.
    #[must_use]
    pub fn effective_refresh_token_lifetime(&self, default_secs: i64) -> i64 {
        positive_or(self.refresh_token_lifetime, default_secs)
    }

    /// Returns `true` if the client asked for encrypted ID tokens.
    #[must_use]
    pub fn wants_encrypted_id_token(&self) -> bool {
        self.id_token_encrypted_response_alg.is_some()
    }
}

fn positive_or(value: Option<i64>, default: i64) -> i64 {
    match value {
        Some(v) if v > 0 => v,
        _ => default,
    }
}
