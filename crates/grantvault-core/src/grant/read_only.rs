//! Immutable grant view for introspection-only paths.

use std::sync::Arc;
use time::OffsetDateTime;

use super::{Grant, GrantKind, GrantMetadata, Minted};
use crate::error::{GrantError, GrantResult};
use crate::token::{Token, TokenKind};
use crate::types::{Client, User};

/// Read-only wrapper around a grant.
///
/// Accessors delegate to the wrapped grant; every mutating operation fails
/// with `GrantError::UnsupportedOperation` and leaves the grant untouched.
///
/// Token accessors hand out detached copies. Revoking or consuming a copy
/// never reaches the grant's own tokens.
#[derive(Debug, Clone)]
pub struct ReadOnlyGrant {
    inner: Arc<Grant>,
}

impl ReadOnlyGrant {
    #[must_use]
    pub fn new(inner: Arc<Grant>) -> Self {
        Self { inner }
    }

    pub fn grant_id(&self) -> &str {
        self.inner.grant_id()
    }

    pub fn kind(&self) -> GrantKind {
        self.inner.kind()
    }

    pub fn client(&self) -> &Client {
        self.inner.client()
    }

    pub fn user(&self) -> Option<&User> {
        self.inner.user()
    }

    pub fn metadata(&self) -> GrantMetadata {
        self.inner.metadata()
    }

    pub fn scopes(&self) -> Vec<String> {
        self.inner.scopes()
    }

    pub fn authorization_code(&self) -> Option<Token> {
        self.inner.authorization_code().map(detach)
    }

    pub fn id_token(&self) -> Option<Token> {
        self.inner.id_token().map(detach)
    }

    pub fn long_lived_access_token(&self) -> Option<Token> {
        self.inner.long_lived_access_token().map(detach)
    }

    pub fn access_tokens(&self) -> Vec<Token> {
        self.inner.access_tokens().into_iter().map(detach).collect()
    }

    pub fn refresh_tokens(&self) -> Vec<Token> {
        self.inner.refresh_tokens().into_iter().map(detach).collect()
    }

    pub fn token_by_storage_key(&self, kind: TokenKind, storage_key: &str) -> Option<Token> {
        self.inner.token_by_storage_key(kind, storage_key).map(detach)
    }

    pub fn resolve_token(&self, presented: &str) -> Option<Token> {
        self.inner.resolve_token(presented).map(detach)
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub fn update_metadata(&self, _update: impl FnOnce(&mut GrantMetadata)) -> GrantResult<()> {
        Err(GrantError::unsupported("update_metadata"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn check_scopes_policy(&self, _requested: &str) -> GrantResult<String> {
        Err(GrantError::unsupported("check_scopes_policy"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn mint_authorization_code(&self) -> GrantResult<Option<Minted>> {
        Err(GrantError::unsupported("mint_authorization_code"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn mint_access_token(
        &self,
        _binding_cert: Option<&[u8]>,
    ) -> GrantResult<Option<Minted>> {
        Err(GrantError::unsupported("mint_access_token"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn mint_long_lived_access_token(&self) -> GrantResult<Option<Minted>> {
        Err(GrantError::unsupported("mint_long_lived_access_token"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn mint_refresh_token(&self) -> GrantResult<Option<Minted>> {
        Err(GrantError::unsupported("mint_refresh_token"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn mint_refresh_token_until(
        &self,
        _expires_at: OffsetDateTime,
    ) -> GrantResult<Option<Minted>> {
        Err(GrantError::unsupported("mint_refresh_token_until"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn mint_id_token(
        &self,
        _nonce: Option<&str>,
        _authorization_code: Option<&str>,
        _access_token: Option<&str>,
    ) -> GrantResult<Option<Minted>> {
        Err(GrantError::unsupported("mint_id_token"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn consume_authorization_code(&self) -> GrantResult<bool> {
        Err(GrantError::unsupported("consume_authorization_code"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn revoke_all_tokens(&self) -> GrantResult<()> {
        Err(GrantError::unsupported("revoke_all_tokens"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn revoke_token(&self, _kind: TokenKind, _storage_key: &str) -> GrantResult<bool> {
        Err(GrantError::unsupported("revoke_token"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub fn check_expired_tokens(&self) -> GrantResult<()> {
        Err(GrantError::unsupported("check_expired_tokens"))
    }

    /// # Errors
    /// Always fails: the view is read-only.
    pub async fn save(&self) -> GrantResult<()> {
        Err(GrantError::unsupported("save"))
    }
}

fn detach(token: Arc<Token>) -> Token {
    Token::clone(&token)
}

impl From<Arc<Grant>> for ReadOnlyGrant {
    fn from(inner: Arc<Grant>) -> Self {
        Self::new(inner)
    }
}
