//! Grant construction.
//!
//! [`GrantFactory`] builds grants of a requested [`GrantKind`] on the
//! backend the composition root selected at startup. No per-call lookup
//! decides the strategy. With a code cache attached, authorization-code
//! grants live in the cache instead.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::debug;

use crate::error::{GrantError, GrantResult};
use crate::grant::{Grant, GrantBackend, GrantKind};
use crate::services::GrantServices;
use crate::storage::GrantCache;
use crate::types::{Client, User};

/// Builds grants with a fixed set of collaborators and a fixed backend.
#[derive(Clone)]
pub struct GrantFactory {
    services: GrantServices,
    backend: GrantBackend,
    code_cache: Option<Arc<dyn GrantCache>>,
}

impl GrantFactory {
    #[must_use]
    pub fn new(services: GrantServices, backend: GrantBackend) -> Self {
        Self {
            services,
            backend,
            code_cache: None,
        }
    }

    /// Keeps authorization-code grants in `cache` instead of the backend.
    #[must_use]
    pub fn with_code_cache(mut self, cache: Arc<dyn GrantCache>) -> Self {
        self.code_cache = Some(cache);
        self
    }

    pub fn services(&self) -> &GrantServices {
        &self.services
    }

    pub fn backend(&self) -> &GrantBackend {
        &self.backend
    }

    /// Backend a grant of `kind` gets.
    #[must_use]
    pub fn backend_for(&self, kind: GrantKind) -> GrantBackend {
        match &self.code_cache {
            Some(cache) if kind == GrantKind::AuthorizationCode => {
                GrantBackend::Cached(Arc::clone(cache))
            }
            _ => self.backend.clone(),
        }
    }

    /// Creates a grant of `kind`.
    ///
    /// Authorization-code grants get their code minted immediately; cached
    /// grants are written to the cache.
    ///
    /// # Arguments
    ///
    /// * `kind` - Grant type
    /// * `user` - Resource owner; required for every kind except client
    ///   credentials, ignored for client credentials
    /// * `client` - Client the grant is issued to
    /// * `authentication_time` - When the user authenticated
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` if a required user is missing, `InvalidLifetime`
    /// for a non-positive code lifetime, or a storage error if the code
    /// could not be persisted.
    pub async fn new_grant(
        &self,
        kind: GrantKind,
        user: Option<User>,
        client: Client,
        authentication_time: Option<OffsetDateTime>,
    ) -> GrantResult<Arc<Grant>> {
        let user = if kind.has_resource_owner() {
            Some(user.ok_or_else(|| {
                GrantError::invalid_grant(format!("{kind} grant requires a resource owner"))
            })?)
        } else {
            None
        };

        let backend = self.backend_for(kind);
        let grant = Arc::new(Grant::create(
            kind,
            user,
            client,
            authentication_time,
            self.services.clone(),
            backend,
        ));

        if kind == GrantKind::AuthorizationCode {
            if grant.mint_authorization_code().await?.is_none() {
                return Err(GrantError::storage("authorization code could not be persisted"));
            }
            if matches!(grant.backend(), GrantBackend::Cached(_)) {
                grant.save().await?;
            }
        }

        debug!(
            grant_id = %grant.grant_id(),
            client_id = %grant.client().client_id,
            kind = %kind,
            backend = grant.backend().name(),
            "grant created"
        );
        Ok(grant)
    }

    /// Creates an authorization-code grant.
    ///
    /// # Errors
    ///
    /// See [`GrantFactory::new_grant`].
    pub async fn authorization_code_grant(
        &self,
        user: User,
        client: Client,
        authentication_time: Option<OffsetDateTime>,
    ) -> GrantResult<Arc<Grant>> {
        self.new_grant(GrantKind::AuthorizationCode, Some(user), client, authentication_time)
            .await
    }

    /// Creates an implicit grant.
    ///
    /// # Errors
    ///
    /// See [`GrantFactory::new_grant`].
    pub async fn implicit_grant(
        &self,
        user: User,
        client: Client,
        authentication_time: Option<OffsetDateTime>,
    ) -> GrantResult<Arc<Grant>> {
        self.new_grant(GrantKind::Implicit, Some(user), client, authentication_time)
            .await
    }

    /// Creates a client credentials grant.
    ///
    /// # Errors
    ///
    /// See [`GrantFactory::new_grant`].
    pub async fn client_credentials_grant(&self, client: Client) -> GrantResult<Arc<Grant>> {
        self.new_grant(GrantKind::ClientCredentials, None, client, None)
            .await
    }

    /// Creates a resource owner password credentials grant.
    ///
    /// # Errors
    ///
    /// See [`GrantFactory::new_grant`].
    pub async fn resource_owner_password_grant(
        &self,
        user: User,
        client: Client,
        authentication_time: Option<OffsetDateTime>,
    ) -> GrantResult<Arc<Grant>> {
        self.new_grant(
            GrantKind::ResourceOwnerPasswordCredentials,
            Some(user),
            client,
            authentication_time,
        )
        .await
    }
}

impl std::fmt::Debug for GrantFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantFactory")
            .field("backend", &self.backend)
            .field("code_cache", &self.code_cache.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrantConfig;
    use crate::token::TokenKind;

    fn factory() -> GrantFactory {
        GrantFactory::new(GrantServices::new(GrantConfig::default()), GrantBackend::InMemory)
    }

    #[tokio::test]
    async fn test_authorization_code_grant_gets_a_code() {
        let grant = factory()
            .authorization_code_grant(
                User::new("user-1", "alice"),
                Client::new("app", "App"),
                Some(OffsetDateTime::now_utc()),
            )
            .await
            .unwrap();

        let code = grant.authorization_code().unwrap();
        assert_eq!(code.kind(), TokenKind::AuthorizationCode);
        assert!(code.is_valid());
        assert_eq!(code.remaining_seconds(code.created_at()), 600);
        assert!(grant.metadata().authentication_time.is_some());
    }

    #[tokio::test]
    async fn test_client_credentials_grant_has_no_user_and_no_code() {
        let grant = factory()
            .new_grant(
                GrantKind::ClientCredentials,
                Some(User::new("ignored", "ignored")),
                Client::new("svc", "Service"),
                None,
            )
            .await
            .unwrap();
        assert!(grant.user().is_none());
        assert!(grant.authorization_code().is_none());
    }

    #[tokio::test]
    async fn test_missing_resource_owner_is_rejected() {
        let err = factory()
            .new_grant(GrantKind::Implicit, None, Client::new("app", "App"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_grant_ids_are_unique() {
        let factory = factory();
        let a = factory
            .client_credentials_grant(Client::new("svc", "Service"))
            .await
            .unwrap();
        let b = factory
            .client_credentials_grant(Client::new("svc", "Service"))
            .await
            .unwrap();
        assert_ne!(a.grant_id(), b.grant_id());
    }
}
