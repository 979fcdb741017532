//! Cache snapshots of authorization-code grants.
//!
//! A [`CacheSnapshot`] is a flat, serializable copy of a grant that another
//! node can resume from after a distributed-cache hit. The authorization
//! code's value and dates are duplicated as scalar fields next to the
//! nested token copy; reconstruction always uses the scalar fields.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{GrantError, GrantResult};
use crate::grant::{Grant, GrantBackend, GrantKind, GrantMetadata};
use crate::services::GrantServices;
use crate::storage::GrantCache;
use crate::token::{Token, TokenKind};
use crate::types::{Client, User};

/// Flattened projection of a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub grant_id: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Grant type discriminant.
    pub grant_type: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub authentication_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr_values: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_binding_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_request_jwt: Option<String>,

    /// Authorization code value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub code_created_at: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub code_expires_at: Option<OffsetDateTime>,

    /// Nested copy of the authorization code. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<Token>,
}

impl CacheSnapshot {
    /// Projects a grant.
    #[must_use]
    pub fn from_grant(grant: &Grant) -> Self {
        let metadata = grant.metadata();
        let code = grant.authorization_code();
        Self {
            grant_id: grant.grant_id().to_string(),
            client_id: grant.client().client_id.clone(),
            user_id: grant.user().map(|u| u.id.clone()),
            grant_type: grant.kind().as_str().to_string(),
            scopes: metadata.scopes.iter().cloned().collect(),
            authentication_time: metadata.authentication_time,
            nonce: metadata.nonce,
            code_challenge: metadata.code_challenge,
            code_challenge_method: metadata.code_challenge_method,
            acr_values: metadata.acr_values,
            session_ref: metadata.session_ref,
            claims: metadata.claims,
            token_binding_hash: metadata.token_binding_hash,
            encoded_request_jwt: metadata.encoded_request_jwt,
            code: code.as_ref().map(|c| c.code().to_string()),
            code_created_at: code.as_ref().map(|c| c.created_at()),
            code_expires_at: code.as_ref().map(|c| c.expires_at()),
            authorization_code: code.map(|c| Token::clone(&c)),
        }
    }

    /// Cache key: `<client_id>_<code>` when a code is present, otherwise the
    /// grant id.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match &self.code {
            Some(code) => code_cache_key(&self.client_id, code),
            None => self.grant_id.clone(),
        }
    }

    /// Entry TTL: the code's remaining seconds, or `access_lifetime` (the
    /// client's effective access-token lifetime) when there is no code.
    #[must_use]
    pub fn ttl_seconds(&self, now: OffsetDateTime, access_lifetime: i64) -> i64 {
        match (&self.code, self.code_expires_at) {
            (Some(_), Some(expires_at)) => (expires_at - now).whole_seconds().max(0),
            _ => access_lifetime,
        }
    }

    /// Serializes to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `GrantError::Cache` if serialization fails.
    pub fn to_bytes(&self) -> GrantResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| GrantError::cache(e.to_string()))
    }

    /// Deserializes from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `GrantError::Cache` if the bytes are not a snapshot.
    pub fn from_bytes(bytes: &[u8]) -> GrantResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| GrantError::cache(e.to_string()))
    }

    /// Writes the snapshot under its cache key. Nothing is written once the
    /// code has no remaining lifetime.
    ///
    /// # Errors
    ///
    /// Returns a cache error.
    pub async fn store(
        &self,
        cache: &dyn GrantCache,
        now: OffsetDateTime,
        access_lifetime: i64,
    ) -> GrantResult<()> {
        let ttl = self.ttl_seconds(now, access_lifetime);
        if ttl <= 0 {
            debug!(grant_id = %self.grant_id, "authorization code expired, snapshot not cached");
            return Ok(());
        }
        let ttl = u64::try_from(ttl).unwrap_or(0);
        cache.put(&self.cache_key(), self.to_bytes()?, ttl).await
    }

    /// Reads a snapshot. Undecodable entries are logged and treated as a
    /// miss.
    ///
    /// # Errors
    ///
    /// Returns a cache error if the cache cannot be reached.
    pub async fn load(cache: &dyn GrantCache, key: &str) -> GrantResult<Option<Self>> {
        let Some(bytes) = cache.get(key).await? else {
            return Ok(None);
        };
        match Self::from_bytes(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                warn!(error = %err, "discarding undecodable grant snapshot");
                Ok(None)
            }
        }
    }

    /// Rebuilds the grant. The authorization code is recreated from the
    /// scalar `code`, `code_created_at` and `code_expires_at` fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` if the grant type is unknown or `client` is
    /// not the snapshot's client.
    pub fn to_grant(
        &self,
        client: Client,
        user: Option<User>,
        services: GrantServices,
        backend: GrantBackend,
    ) -> GrantResult<Grant> {
        let kind = GrantKind::from_grant_type(&self.grant_type).ok_or_else(|| {
            GrantError::invalid_grant(format!("unknown grant type '{}'", self.grant_type))
        })?;
        if client.client_id != self.client_id {
            return Err(GrantError::invalid_grant(format!(
                "snapshot belongs to client '{}'",
                self.client_id
            )));
        }

        let metadata = GrantMetadata {
            scopes: self.scopes.iter().cloned().collect(),
            authentication_time: self.authentication_time,
            nonce: self.nonce.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
            token_binding_hash: self.token_binding_hash.clone(),
            acr_values: self.acr_values.clone(),
            session_ref: self.session_ref.clone(),
            claims: self.claims.clone(),
            encoded_request_jwt: self.encoded_request_jwt.clone(),
        };
        let storage_key = self.code.as_deref().map(|c| services.hasher.hash(c));
        let grant = Grant::assemble(
            self.grant_id.clone(),
            kind,
            user,
            client,
            services,
            backend,
            metadata,
        );

        if let (Some(code), Some(key), Some(created_at), Some(expires_at)) = (
            &self.code,
            storage_key,
            self.code_created_at,
            self.code_expires_at,
        ) {
            let token = Token::restore(
                TokenKind::AuthorizationCode,
                code.clone(),
                key,
                created_at,
                expires_at,
            )
            .with_auth_context_ref(self.acr_values.clone())
            .with_session_ref(self.session_ref.clone());
            grant.adopt_token(Arc::new(token), false);
        }
        Ok(grant)
    }
}

/// Cache key of an authorization-code grant.
#[must_use]
pub fn code_cache_key(client_id: &str, code: &str) -> String {
    format!("{client_id}_{code}")
}
