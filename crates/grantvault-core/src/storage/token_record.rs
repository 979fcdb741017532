//! Token record storage trait.
//!
//! The persistent strategy writes one record per minted token. Records of
//! the same grant share `grant_id` and duplicate the grant's correlation
//! metadata, so any single record is enough to rehydrate the grant.
//!
//! # Security Considerations
//!
//! - `token_code` is always the storage key (hash), never the raw code
//! - `delete_by_grant_id` is the revocation cascade and must remove every
//!   record of the grant
//! - Expired records are purged by the backend, outside the grant core

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::GrantResult;

/// Persisted form of one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Owning grant.
    pub grant_id: String,

    /// Storage key of the token (hashed code).
    pub token_code: String,

    /// Client the grant was issued to.
    pub client_id: String,

    /// Resource owner, absent for client credentials grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Token kind (`access_token`, `refresh_token`, ...).
    pub token_type: String,

    /// Grant type discriminant (`authorization_code`, `implicit`, ...).
    /// Stored as a raw string; unknown values are rejected on rehydration.
    pub grant_type: String,

    /// Unique token identifier (`jti`).
    pub reference_id: String,

    /// When the token was minted.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the token expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Whether the token was revoked (refresh rotation).
    #[serde(default)]
    pub revoked: bool,

    /// Whether the authorization code was consumed.
    #[serde(default)]
    pub used: bool,

    /// Whether this access token is the grant's long-lived token.
    #[serde(default)]
    pub long_lived: bool,

    /// Storage key of the grant's authorization code, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,

    /// Space-joined granted scopes.
    #[serde(default)]
    pub scope: String,

    /// Nonce from the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authentication context (ACR values).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr_values: Option<String>,

    /// Authentication session reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ref: Option<String>,

    /// When the user authenticated.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub authentication_time: Option<OffsetDateTime>,

    /// PKCE code challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE code challenge method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// Requested claims (JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<String>,

    /// Encoded request object JWT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_request: Option<String>,

    /// Token binding hash from the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_binding_hash: Option<String>,

    /// `x5t#S256` thumbprint for certificate-bound access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_hash: Option<String>,
}

impl TokenRecord {
    /// Returns `true` if the record is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

/// Storage trait for token records.
///
/// Records are addressed by `(grant_id, token_code, client_id)`:
/// `token_code` is unique on its own, `grant_id` groups the records of one
/// grant, and `client_id` supports per-client listing.
///
/// # Implementations
///
/// - `grantvault-memory` - in-process DashMap store
#[async_trait]
pub trait TokenRecordStorage: Send + Sync {
    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored (duplicate
    /// `token_code`, storage unavailable).
    async fn create(&self, record: &TokenRecord) -> GrantResult<()>;

    /// Finds a record by its token storage key.
    ///
    /// # Returns
    ///
    /// `Some(record)` regardless of revocation or expiry, `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_code(&self, token_code: &str) -> GrantResult<Option<TokenRecord>>;

    /// Lists every record of a grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_grant_id(&self, grant_id: &str) -> GrantResult<Vec<TokenRecord>>;

    /// Lists every record issued to a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_client(&self, client_id: &str) -> GrantResult<Vec<TokenRecord>>;

    /// Replaces an existing record (matched by `token_code`).
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist or the update fails.
    async fn update(&self, record: &TokenRecord) -> GrantResult<()>;

    /// Deletes one record. Deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete(&self, token_code: &str) -> GrantResult<()>;

    /// Deletes every record of a grant.
    ///
    /// # Returns
    ///
    /// The number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_by_grant_id(&self, grant_id: &str) -> GrantResult<u64>;

    /// Purges records that expired before `now`.
    ///
    /// # Returns
    ///
    /// The number of records purged.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn cleanup_expired(&self, now: OffsetDateTime) -> GrantResult<u64>;
}
