//! Grant lifecycle facade for request handlers.
//!
//! [`GrantService`] wires a [`GrantFactory`] to the registry chosen by the
//! configured storage strategy, applies the index events every mint
//! returns, and implements the authorization code exchange with reuse
//! detection.
//!
//! # Authorization code cache
//!
//! With `cache.enabled`, authorization-code grants live in the
//! [`GrantCache`] until they are exchanged. The exchange removes the cache
//! entry, rebuilds the grant on the configured backend and registers it, so
//! a replayed code is found in the registry and revokes the grant.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::config::StorageStrategy;
use crate::error::{GrantError, GrantResult};
use crate::factory::GrantFactory;
use crate::grant::{Grant, GrantBackend, IndexEvent, Minted, ReadOnlyGrant};
use crate::index::GrantIndex;
use crate::registry::GrantRegistry;
use crate::services::GrantServices;
use crate::snapshot::{CacheSnapshot, code_cache_key};
use crate::storage::{ClientDirectory, GrantCache, TokenRecordStorage, UserDirectory};
use crate::store::GrantStore;
use crate::token::{Token, TokenKind};
use crate::types::{Client, User};

/// Collaborators of the authorization code cache path.
struct CodeCache {
    cache: Arc<dyn GrantCache>,
    users: Arc<dyn UserDirectory>,
    clients: Arc<dyn ClientDirectory>,
}

/// Builds a [`GrantService`] from [`GrantServices`] and the storage
/// collaborators the configuration asks for.
#[derive(Default)]
pub struct GrantServiceBuilder {
    records: Option<Arc<dyn TokenRecordStorage>>,
    cache: Option<Arc<dyn GrantCache>>,
    users: Option<Arc<dyn UserDirectory>>,
    clients: Option<Arc<dyn ClientDirectory>>,
}

impl GrantServiceBuilder {
    /// Token record store, required by the persistent strategy.
    #[must_use]
    pub fn record_storage(mut self, records: Arc<dyn TokenRecordStorage>) -> Self {
        self.records = Some(records);
        self
    }

    /// Distributed cache, required when `cache.enabled` is set.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn GrantCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    #[must_use]
    pub fn clients(mut self, clients: Arc<dyn ClientDirectory>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Builds the service.
    ///
    /// # Errors
    ///
    /// Returns `GrantError::Configuration` if a collaborator required by the
    /// configured strategy or cache setting is missing.
    pub fn build(self, services: GrantServices) -> GrantResult<GrantService> {
        let config = Arc::clone(&services.config);

        let (backend, registry): (GrantBackend, Arc<dyn GrantRegistry>) =
            match config.storage.strategy {
                StorageStrategy::InMemory => (
                    GrantBackend::InMemory,
                    Arc::new(GrantIndex::new(&services)),
                ),
                StorageStrategy::Persistent => {
                    let records = required(self.records.clone(), "token record storage")?;
                    let store = GrantStore::new(
                        Arc::clone(&records),
                        required(self.users.clone(), "user directory")?,
                        required(self.clients.clone(), "client directory")?,
                        services.clone(),
                    );
                    (GrantBackend::Persistent(records), Arc::new(store))
                }
            };

        let mut factory = GrantFactory::new(services, backend);
        let code_cache = if config.cache.enabled {
            let code_cache = CodeCache {
                cache: required(self.cache, "grant cache")?,
                users: required(self.users, "user directory")?,
                clients: required(self.clients, "client directory")?,
            };
            factory = factory.with_code_cache(Arc::clone(&code_cache.cache));
            Some(code_cache)
        } else {
            None
        };

        debug!(
            strategy = ?config.storage.strategy,
            cache = config.cache.enabled,
            "grant service built"
        );
        Ok(GrantService {
            factory,
            registry,
            code_cache,
        })
    }
}

fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> GrantResult<Arc<T>> {
    value.ok_or_else(|| GrantError::configuration(format!("{name} is required")))
}

/// Grant creation, token issuance, lookup and revocation.
pub struct GrantService {
    factory: GrantFactory,
    registry: Arc<dyn GrantRegistry>,
    code_cache: Option<CodeCache>,
}

impl GrantService {
    #[must_use]
    pub fn builder() -> GrantServiceBuilder {
        GrantServiceBuilder::default()
    }

    /// Service over an explicit factory and registry, without a code cache.
    #[must_use]
    pub fn new(factory: GrantFactory, registry: Arc<dyn GrantRegistry>) -> Self {
        Self {
            factory,
            registry,
            code_cache: None,
        }
    }

    pub fn factory(&self) -> &GrantFactory {
        &self.factory
    }

    pub fn registry(&self) -> &Arc<dyn GrantRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &GrantServices {
        self.factory.services()
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Creates an authorization-code grant with its code.
    ///
    /// Cached grants are written to the cache and registered on exchange.
    ///
    /// # Errors
    ///
    /// See [`GrantFactory::new_grant`].
    pub async fn create_authorization_code_grant(
        &self,
        user: User,
        client: Client,
        authentication_time: Option<OffsetDateTime>,
    ) -> GrantResult<Arc<Grant>> {
        let grant = self
            .factory
            .authorization_code_grant(user, client, authentication_time)
            .await?;
        if !matches!(grant.backend(), GrantBackend::Cached(_)) {
            self.registry.register(&grant).await?;
        }
        Ok(grant)
    }

    /// # Errors
    ///
    /// See [`GrantFactory::new_grant`].
    pub async fn create_implicit_grant(
        &self,
        user: User,
        client: Client,
        authentication_time: Option<OffsetDateTime>,
    ) -> GrantResult<Arc<Grant>> {
        let grant = self
            .factory
            .implicit_grant(user, client, authentication_time)
            .await?;
        self.registry.register(&grant).await?;
        Ok(grant)
    }

    /// # Errors
    ///
    /// See [`GrantFactory::new_grant`].
    pub async fn create_client_credentials_grant(&self, client: Client) -> GrantResult<Arc<Grant>> {
        let grant = self.factory.client_credentials_grant(client).await?;
        self.registry.register(&grant).await?;
        Ok(grant)
    }

    /// # Errors
    ///
    /// See [`GrantFactory::new_grant`].
    pub async fn create_resource_owner_password_grant(
        &self,
        user: User,
        client: Client,
        authentication_time: Option<OffsetDateTime>,
    ) -> GrantResult<Arc<Grant>> {
        let grant = self
            .factory
            .resource_owner_password_grant(user, client, authentication_time)
            .await?;
        self.registry.register(&grant).await?;
        Ok(grant)
    }

    // ------------------------------------------------------------------------
    // Issuance
    // ------------------------------------------------------------------------

    async fn publish(
        &self,
        grant: &Arc<Grant>,
        minted: Option<Minted>,
    ) -> GrantResult<Option<Arc<Token>>> {
        let Some(minted) = minted else {
            return Ok(None);
        };
        if minted.is_fresh() {
            self.registry.apply(grant, &minted.events).await?;
        }
        Ok(Some(minted.token))
    }

    /// Mints an access token and makes it resolvable.
    ///
    /// # Errors
    ///
    /// See [`Grant::mint_access_token`].
    pub async fn issue_access_token(
        &self,
        grant: &Arc<Grant>,
        binding_cert: Option<&[u8]>,
    ) -> GrantResult<Option<Arc<Token>>> {
        let minted = grant.mint_access_token(binding_cert).await?;
        self.publish(grant, minted).await
    }

    /// # Errors
    ///
    /// See [`Grant::mint_long_lived_access_token`].
    pub async fn issue_long_lived_access_token(
        &self,
        grant: &Arc<Grant>,
    ) -> GrantResult<Option<Arc<Token>>> {
        let minted = grant.mint_long_lived_access_token().await?;
        self.publish(grant, minted).await
    }

    /// # Errors
    ///
    /// See [`Grant::mint_refresh_token`].
    pub async fn issue_refresh_token(&self, grant: &Arc<Grant>) -> GrantResult<Option<Arc<Token>>> {
        let minted = grant.mint_refresh_token().await?;
        self.publish(grant, minted).await
    }

    /// # Errors
    ///
    /// See [`Grant::mint_refresh_token_until`].
    pub async fn issue_refresh_token_until(
        &self,
        grant: &Arc<Grant>,
        expires_at: OffsetDateTime,
    ) -> GrantResult<Option<Arc<Token>>> {
        let minted = grant.mint_refresh_token_until(expires_at).await?;
        self.publish(grant, minted).await
    }

    /// # Errors
    ///
    /// See [`Grant::mint_id_token`].
    pub async fn issue_id_token(
        &self,
        grant: &Arc<Grant>,
        nonce: Option<&str>,
        authorization_code: Option<&str>,
        access_token: Option<&str>,
    ) -> GrantResult<Option<Arc<Token>>> {
        let minted = grant
            .mint_id_token(nonce, authorization_code, access_token)
            .await?;
        self.publish(grant, minted).await
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Finds the grant of a valid authorization code issued to `client_id`.
    /// The cache is consulted before the registry.
    ///
    /// # Errors
    ///
    /// Returns a cache or storage error.
    pub async fn grant_by_authorization_code(
        &self,
        client_id: &str,
        code: &str,
    ) -> GrantResult<Option<Arc<Grant>>> {
        let now = self.services().now();
        if let Some(code_cache) = &self.code_cache {
            let key = code_cache_key(client_id, code);
            if let Some(snapshot) = CacheSnapshot::load(code_cache.cache.as_ref(), &key).await? {
                let backend = GrantBackend::Cached(Arc::clone(&code_cache.cache));
                let grant = self.resume(code_cache, &snapshot, backend).await?;
                return Ok(grant.filter(|g| {
                    g.authorization_code()
                        .is_some_and(|c| c.is_valid_at(now))
                }));
            }
        }

        Ok(self
            .registry
            .resolve(TokenKind::AuthorizationCode, code)
            .await?
            .filter(|g| g.client().client_id == client_id))
    }

    /// Exchanges an authorization code. The code is single-use: presenting
    /// a consumed code revokes every token of its grant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` if the code is unknown, belongs to another
    /// client, has expired or was already used.
    pub async fn exchange_authorization_code(
        &self,
        client_id: &str,
        code: &str,
    ) -> GrantResult<Arc<Grant>> {
        if let Some(code_cache) = &self.code_cache {
            let key = code_cache_key(client_id, code);
            if let Some(snapshot) = CacheSnapshot::load(code_cache.cache.as_ref(), &key).await? {
                code_cache.cache.remove(&key).await?;
                let backend = self.factory.backend().clone();
                let Some(grant) = self.resume(code_cache, &snapshot, backend).await? else {
                    return Err(GrantError::invalid_grant("authorization code is not valid"));
                };
                self.consume(&grant).await?;
                self.registry.register(&grant).await?;
                return Ok(grant);
            }
        }

        let Some(grant) = self
            .registry
            .find(TokenKind::AuthorizationCode, code)
            .await?
        else {
            return Err(GrantError::invalid_grant("unknown authorization code"));
        };
        if grant.client().client_id != client_id {
            return Err(GrantError::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        self.consume(&grant).await?;
        Ok(grant)
    }

    async fn consume(&self, grant: &Arc<Grant>) -> GrantResult<()> {
        let code = grant
            .authorization_code()
            .ok_or_else(|| GrantError::invalid_grant("grant has no authorization code"))?;
        if code.is_revoked() || code.check_expired(self.services().now()) {
            return Err(GrantError::invalid_grant("authorization code expired or revoked"));
        }
        if !grant.consume_authorization_code().await? {
            warn!(
                grant_id = %grant.grant_id(),
                client_id = %grant.client().client_id,
                "authorization code reused, revoking grant"
            );
            self.revoke_grant(grant).await?;
            return Err(GrantError::invalid_grant("authorization code already used"));
        }
        debug!(grant_id = %grant.grant_id(), "authorization code exchanged");
        Ok(())
    }

    async fn resume(
        &self,
        code_cache: &CodeCache,
        snapshot: &CacheSnapshot,
        backend: GrantBackend,
    ) -> GrantResult<Option<Arc<Grant>>> {
        let Some(client) = code_cache.clients.find_client(&snapshot.client_id).await? else {
            warn!(grant_id = %snapshot.grant_id, "client of cached grant not found");
            return Ok(None);
        };
        let user = match &snapshot.user_id {
            Some(user_id) => match code_cache.users.find_user(user_id).await? {
                Some(user) => Some(user),
                None => {
                    warn!(grant_id = %snapshot.grant_id, "user of cached grant not found");
                    return Ok(None);
                }
            },
            None => None,
        };
        let grant = snapshot.to_grant(client, user, self.services().clone(), backend)?;
        Ok(Some(Arc::new(grant)))
    }

    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    pub async fn grant_by_access_token(&self, code: &str) -> GrantResult<Option<Arc<Grant>>> {
        self.registry.resolve(TokenKind::AccessToken, code).await
    }

    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    pub async fn grant_by_refresh_token(&self, code: &str) -> GrantResult<Option<Arc<Grant>>> {
        self.registry.resolve(TokenKind::RefreshToken, code).await
    }

    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    pub async fn grant_by_id_token(&self, code: &str) -> GrantResult<Option<Arc<Grant>>> {
        self.registry.resolve(TokenKind::IdToken, code).await
    }

    /// Read-only view of the grant owning a valid token.
    ///
    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    pub async fn introspect(
        &self,
        kind: TokenKind,
        code: &str,
    ) -> GrantResult<Option<ReadOnlyGrant>> {
        Ok(self
            .registry
            .resolve(kind, code)
            .await?
            .map(ReadOnlyGrant::new))
    }

    // ------------------------------------------------------------------------
    // Revocation and maintenance
    // ------------------------------------------------------------------------

    /// Revokes one access or refresh token.
    ///
    /// # Returns
    ///
    /// `false` if no grant owns the token.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn revoke_token(&self, code: &str) -> GrantResult<bool> {
        let key = self.services().hasher.hash(code);
        for kind in [TokenKind::AccessToken, TokenKind::RefreshToken] {
            let Some(grant) = self.registry.find(kind, code).await? else {
                continue;
            };
            if grant.revoke_token(kind, &key).await? {
                let dropped = IndexEvent::TokenDropped {
                    kind,
                    storage_key: key,
                };
                self.registry.apply(&grant, &[dropped]).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Revokes every token of `grant` and removes it from the registry.
    ///
    /// # Errors
    ///
    /// Returns a storage or cache error.
    pub async fn revoke_grant(&self, grant: &Arc<Grant>) -> GrantResult<()> {
        grant.revoke_all_tokens().await?;
        self.registry.remove(std::slice::from_ref(grant)).await
    }

    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    pub async fn grants_by_client(&self, client_id: &str) -> GrantResult<Vec<Arc<Grant>>> {
        self.registry.grants_by_client(client_id).await
    }

    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    pub async fn cleanup_expired(&self) -> GrantResult<u64> {
        self.registry.cleanup_expired().await
    }
}

impl std::fmt::Debug for GrantService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantService")
            .field("factory", &self.factory)
            .field("code_cache", &self.code_cache.is_some())
            .finish_non_exhaustive()
    }
}
