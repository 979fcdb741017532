//! Grant aggregate.
//!
//! A [`Grant`] owns every token issued for one authorization transaction:
//! one client, optionally one user, one scope set. It mints, looks up and
//! revokes its tokens; registries learn about new tokens from the
//! [`IndexEvent`]s each mint returns.
//!
//! # Backends
//!
//! The backend is chosen by the composition root and fixed per grant:
//!
//! - [`GrantBackend::InMemory`] - tokens only live in this process
//! - [`GrantBackend::Persistent`] - every mint writes a [`TokenRecord`]
//! - [`GrantBackend::Cached`] - authorization-code grants that live in the
//!   distributed cache only; `save` writes a [`CacheSnapshot`]
//!
//! # Concurrency
//!
//! Access and refresh tokens live in `DashMap`s with per-key atomicity and
//! no cross-key transactions. The authorization code and long-lived slots
//! are swapped atomically under an async slot lock, refresh rotation is
//! serialized by its own lock, and the ID token is set at most once.

pub mod kind;
pub mod read_only;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{GrantError, GrantResult};
use crate::metrics;
use crate::services::{AccessTokenRequest, GrantServices, IdTokenRequest};
use crate::snapshot::CacheSnapshot;
use crate::storage::{GrantCache, TokenRecord, TokenRecordStorage};
use crate::token::{Token, TokenKind, cert_thumbprint_s256};
use crate::types::{Client, User};

pub use kind::GrantKind;
pub use read_only::ReadOnlyGrant;

/// Storage strategy backing a grant.
#[derive(Clone)]
pub enum GrantBackend {
    /// Tokens live only in this process.
    InMemory,
    /// Tokens are written through to a record store.
    Persistent(Arc<dyn TokenRecordStorage>),
    /// Authorization-code grants kept in a distributed cache, no record
    /// store.
    Cached(Arc<dyn GrantCache>),
}

impl GrantBackend {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::Persistent(_) => "persistent",
            Self::Cached(_) => "cached",
        }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl fmt::Debug for GrantBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Request correlation metadata of a grant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantMetadata {
    /// Granted scopes, in policy order. Replaced wholesale on every scope
    /// policy check.
    pub scopes: IndexSet<String>,
    pub authentication_time: Option<OffsetDateTime>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub token_binding_hash: Option<String>,
    pub acr_values: Option<String>,
    pub session_ref: Option<String>,
    /// Requested claims (JSON).
    pub claims: Option<String>,
    pub encoded_request_jwt: Option<String>,
}

impl GrantMetadata {
    /// Space-joined scopes.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Registry update produced by a mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    /// A token was added to the grant and must become resolvable.
    TokenMinted { kind: TokenKind, storage_key: String },
    /// A token was dropped from the grant (long-lived replacement).
    TokenDropped { kind: TokenKind, storage_key: String },
}

/// Result of a successful mint.
#[derive(Debug, Clone)]
pub struct Minted {
    pub token: Arc<Token>,
    /// Empty when an existing token was returned.
    pub events: Vec<IndexEvent>,
}

impl Minted {
    fn fresh(token: Arc<Token>) -> Self {
        let events = vec![IndexEvent::TokenMinted {
            kind: token.kind(),
            storage_key: token.storage_key().to_string(),
        }];
        Self { token, events }
    }

    fn reused(token: Arc<Token>) -> Self {
        Self {
            token,
            events: Vec::new(),
        }
    }

    /// Returns `true` if the mint produced a new token.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        !self.events.is_empty()
    }
}

enum IdTokenFailure {
    Issue(GrantError),
    Persist(GrantError),
}

/// One authorization transaction and the tokens issued for it.
pub struct Grant {
    grant_id: String,
    kind: GrantKind,
    user: Option<User>,
    client: Client,
    services: GrantServices,
    backend: GrantBackend,
    metadata: RwLock<GrantMetadata>,
    authorization_code: ArcSwapOption<Token>,
    access_tokens: DashMap<String, Arc<Token>>,
    refresh_tokens: DashMap<String, Arc<Token>>,
    id_token: OnceCell<Arc<Token>>,
    long_lived: ArcSwapOption<Token>,
    slot_lock: Mutex<()>,
    rotation_lock: Mutex<()>,
}

impl Grant {
    pub(crate) fn assemble(
        grant_id: String,
        kind: GrantKind,
        user: Option<User>,
        client: Client,
        services: GrantServices,
        backend: GrantBackend,
        metadata: GrantMetadata,
    ) -> Self {
        Self {
            grant_id,
            kind,
            user,
            client,
            services,
            backend,
            metadata: RwLock::new(metadata),
            authorization_code: ArcSwapOption::empty(),
            access_tokens: DashMap::new(),
            refresh_tokens: DashMap::new(),
            id_token: OnceCell::new(),
            long_lived: ArcSwapOption::empty(),
            slot_lock: Mutex::new(()),
            rotation_lock: Mutex::new(()),
        }
    }

    pub(crate) fn create(
        kind: GrantKind,
        user: Option<User>,
        client: Client,
        authentication_time: Option<OffsetDateTime>,
        services: GrantServices,
        backend: GrantBackend,
    ) -> Self {
        let metadata = GrantMetadata {
            authentication_time,
            ..GrantMetadata::default()
        };
        Self::assemble(
            Uuid::new_v4().to_string(),
            kind,
            user,
            client,
            services,
            backend,
            metadata,
        )
    }

    /// Places a rehydrated token into its slot without persisting it.
    pub(crate) fn adopt_token(&self, token: Arc<Token>, long_lived: bool) {
        match token.kind() {
            TokenKind::AuthorizationCode => self.authorization_code.store(Some(token)),
            TokenKind::AccessToken if long_lived => self.long_lived.store(Some(token)),
            TokenKind::AccessToken => {
                self.access_tokens
                    .insert(token.storage_key().to_string(), token);
            }
            TokenKind::RefreshToken => {
                self.refresh_tokens
                    .insert(token.storage_key().to_string(), token);
            }
            TokenKind::IdToken => {
                let _ = self.id_token.set(token);
            }
        }
    }

    pub fn grant_id(&self) -> &str {
        &self.grant_id
    }

    pub fn kind(&self) -> GrantKind {
        self.kind
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn backend(&self) -> &GrantBackend {
        &self.backend
    }

    pub(crate) fn services(&self) -> &GrantServices {
        &self.services
    }

    /// Copy of the correlation metadata.
    pub fn metadata(&self) -> GrantMetadata {
        self.metadata.read().clone()
    }

    pub fn scopes(&self) -> Vec<String> {
        self.metadata.read().scopes.iter().cloned().collect()
    }

    pub fn scope_string(&self) -> String {
        self.metadata.read().scope_string()
    }

    /// Mutates the correlation metadata in place. Call [`Grant::save`] to
    /// persist the change.
    pub fn update_metadata(&self, update: impl FnOnce(&mut GrantMetadata)) {
        update(&mut self.metadata.write());
    }

    pub fn authorization_code(&self) -> Option<Arc<Token>> {
        self.authorization_code.load_full()
    }

    pub fn id_token(&self) -> Option<Arc<Token>> {
        self.id_token.get().cloned()
    }

    pub fn long_lived_access_token(&self) -> Option<Arc<Token>> {
        self.long_lived.load_full()
    }

    pub fn access_tokens(&self) -> Vec<Arc<Token>> {
        self.access_tokens
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Every refresh token ever minted, revoked ones included.
    pub fn refresh_tokens(&self) -> Vec<Arc<Token>> {
        self.refresh_tokens
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Every token the grant owns.
    pub fn tokens(&self) -> Vec<Arc<Token>> {
        let mut tokens = self.access_tokens();
        tokens.extend(self.refresh_tokens());
        tokens.extend(self.authorization_code());
        tokens.extend(self.id_token());
        tokens.extend(self.long_lived_access_token());
        tokens
    }

    /// Finds an owned token by kind and storage key.
    #[must_use]
    pub fn token_by_storage_key(&self, kind: TokenKind, storage_key: &str) -> Option<Arc<Token>> {
        let matches = |t: &Arc<Token>| t.storage_key() == storage_key;
        match kind {
            TokenKind::AuthorizationCode => self.authorization_code().filter(matches),
            TokenKind::IdToken => self.id_token().filter(matches),
            TokenKind::AccessToken => self
                .access_tokens
                .get(storage_key)
                .map(|e| Arc::clone(e.value()))
                .or_else(|| self.long_lived_access_token().filter(matches)),
            TokenKind::RefreshToken => self
                .refresh_tokens
                .get(storage_key)
                .map(|e| Arc::clone(e.value())),
        }
    }

    /// Resolves a presented code: hashed first, then matched against the
    /// ID token, the long-lived access token and the access tokens.
    ///
    /// A storage key presented as if it were a code never matches.
    #[must_use]
    pub fn resolve_token(&self, presented: &str) -> Option<Arc<Token>> {
        let key = self.services.hasher.hash(presented);
        let matches = |t: &Arc<Token>| t.storage_key() == key;
        self.id_token()
            .filter(matches)
            .or_else(|| self.long_lived_access_token().filter(matches))
            .or_else(|| {
                self.access_tokens
                    .get(&key)
                    .map(|e| Arc::clone(e.value()))
            })
    }

    /// Mints the grant's single authorization code. Returns the existing
    /// code if one was already minted.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for grants that are not authorization
    /// code grants, or `InvalidLifetime` for a non-positive configured
    /// lifetime.
    pub async fn mint_authorization_code(&self) -> GrantResult<Option<Minted>> {
        if self.kind != GrantKind::AuthorizationCode {
            return Err(GrantError::unsupported(format!(
                "mint_authorization_code on {} grant",
                self.kind
            )));
        }
        let _slot = self.slot_lock.lock().await;
        if let Some(existing) = self.authorization_code.load_full() {
            return Ok(Some(Minted::reused(existing)));
        }

        let now = self.services.now();
        let lifetime = self.services.config.tokens.authorization_code_secs();
        let token = Arc::new(self.new_token(TokenKind::AuthorizationCode, lifetime, now)?);
        if let Err(err) = self.write_through(&token, false).await {
            self.log_issuance_failure(TokenKind::AuthorizationCode, &err);
            return Ok(None);
        }
        self.authorization_code.store(Some(Arc::clone(&token)));
        self.log_minted(&token);
        Ok(Some(Minted::fresh(token)))
    }

    /// Mints an access token.
    ///
    /// The lifetime is the client's override when positive, otherwise the
    /// configured default. `binding_cert` is the DER encoding of the client
    /// certificate the token is bound to. Clients registered with
    /// `access_token_as_jwt` get a signed JWT as the code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLifetime` if the effective lifetime is not positive,
    /// `Configuration` if a JWT is required but no signer is configured, or
    /// the signer's error. A persistence failure is logged and yields
    /// `Ok(None)`.
    pub async fn mint_access_token(
        &self,
        binding_cert: Option<&[u8]>,
    ) -> GrantResult<Option<Minted>> {
        let now = self.services.now();
        let lifetime = self
            .client
            .effective_access_token_lifetime(self.services.config.tokens.access_token_secs());
        let mut token = self
            .new_token(TokenKind::AccessToken, lifetime, now)?
            .with_confirmation_hash(binding_cert.map(cert_thumbprint_s256));
        if self.client.access_token_as_jwt {
            token = self.sign_access_token(token).await?;
        }
        let token = Arc::new(token);

        if let Err(err) = self.write_through(&token, false).await {
            self.log_issuance_failure(TokenKind::AccessToken, &err);
            return Ok(None);
        }
        self.access_tokens
            .insert(token.storage_key().to_string(), Arc::clone(&token));
        self.log_minted(&token);
        Ok(Some(Minted::fresh(token)))
    }

    /// Returns the long-lived access token, minting a replacement once the
    /// current one is at least as old as the reuse window.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLifetime` for a non-positive configured lifetime.
    pub async fn mint_long_lived_access_token(&self) -> GrantResult<Option<Minted>> {
        let _slot = self.slot_lock.lock().await;
        let now = self.services.now();
        let tokens = &self.services.config.tokens;

        let previous = self.long_lived.load_full();
        if let Some(existing) = &previous
            && existing.age(now) < tokens.long_lived_reuse_window()
        {
            return Ok(Some(Minted::reused(Arc::clone(existing))));
        }

        let token = Arc::new(self.new_token(
            TokenKind::AccessToken,
            tokens.long_lived_access_token_secs(),
            now,
        )?);
        if let Err(err) = self.write_through(&token, true).await {
            self.log_issuance_failure(TokenKind::AccessToken, &err);
            return Ok(None);
        }
        self.long_lived.store(Some(Arc::clone(&token)));
        self.log_minted(&token);

        let mut minted = Minted::fresh(token);
        if let Some(old) = previous {
            if let GrantBackend::Persistent(store) = &self.backend
                && let Err(err) = store.delete(old.storage_key()).await
            {
                warn!(grant_id = %self.grant_id, error = %err, "failed to delete replaced long-lived token record");
            }
            minted.events.push(IndexEvent::TokenDropped {
                kind: TokenKind::AccessToken,
                storage_key: old.storage_key().to_string(),
            });
        }
        Ok(Some(minted))
    }

    /// Mints a refresh token and revokes every refresh token the grant
    /// already holds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLifetime` if the effective lifetime is not positive.
    /// A persistence failure is logged and yields `Ok(None)` without
    /// revoking the current refresh tokens.
    pub async fn mint_refresh_token(&self) -> GrantResult<Option<Minted>> {
        let lifetime = self
            .client
            .effective_refresh_token_lifetime(self.services.config.tokens.refresh_token_secs());
        self.mint_refresh(lifetime).await
    }

    /// Mints a refresh token that expires at `expires_at`, rotating like
    /// [`Grant::mint_refresh_token`].
    ///
    /// An expiration that is not in the future produces no token.
    ///
    /// # Errors
    ///
    /// See [`Grant::mint_refresh_token`].
    pub async fn mint_refresh_token_until(
        &self,
        expires_at: OffsetDateTime,
    ) -> GrantResult<Option<Minted>> {
        let lifetime = (expires_at - self.services.now()).whole_seconds();
        if lifetime <= 0 {
            debug!(
                grant_id = %self.grant_id,
                "refresh token expiration is not in the future, skipping"
            );
            return Ok(None);
        }
        self.mint_refresh(lifetime).await
    }

    async fn mint_refresh(&self, lifetime: i64) -> GrantResult<Option<Minted>> {
        let _rotation = self.rotation_lock.lock().await;
        let now = self.services.now();
        let token = Arc::new(self.new_token(TokenKind::RefreshToken, lifetime, now)?);

        if let Err(err) = self.write_through(&token, false).await {
            self.log_issuance_failure(TokenKind::RefreshToken, &err);
            return Ok(None);
        }

        let revoked = self.revoke_refresh_tokens().await;
        self.refresh_tokens
            .insert(token.storage_key().to_string(), Arc::clone(&token));
        self.log_minted(&token);
        debug!(
            grant_id = %self.grant_id,
            client_id = %self.client.client_id,
            revoked,
            "refresh token rotated"
        );
        Ok(Some(Minted::fresh(token)))
    }

    async fn revoke_refresh_tokens(&self) -> usize {
        let previous: Vec<Arc<Token>> = self
            .refresh_tokens()
            .into_iter()
            .filter(|t| !t.is_revoked())
            .collect();
        for token in &previous {
            token.revoke();
            if let GrantBackend::Persistent(store) = &self.backend
                && let Err(err) = update_record(store.as_ref(), token.storage_key(), |r| {
                    r.revoked = true;
                })
                .await
            {
                warn!(grant_id = %self.grant_id, error = %err, "failed to mark rotated refresh token revoked");
            }
        }
        previous.len()
    }

    /// Mints the grant's ID token, or returns it if one was already minted.
    ///
    /// `nonce` falls back to the grant's nonce. `authorization_code` and
    /// `access_token` are the raw values the `c_hash` and `at_hash` claims
    /// are computed from.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no ID token issuer is configured, or the
    /// issuer's error. A persistence failure is logged and yields `Ok(None)`.
    pub async fn mint_id_token(
        &self,
        nonce: Option<&str>,
        authorization_code: Option<&str>,
        access_token: Option<&str>,
    ) -> GrantResult<Option<Minted>> {
        if let Some(existing) = self.id_token.get() {
            return Ok(Some(Minted::reused(Arc::clone(existing))));
        }
        let issuer = self
            .services
            .id_token_issuer
            .clone()
            .ok_or_else(|| GrantError::configuration("no ID token issuer configured"))?;

        let minted_here = AtomicBool::new(false);
        let flag = &minted_here;
        let result = self
            .id_token
            .get_or_try_init(|| async move {
                let now = self.services.now();
                let lifetime = self.services.config.tokens.id_token_secs();
                let request =
                    self.id_token_request(nonce, authorization_code, access_token, now, lifetime);
                let jwt = issuer
                    .issue_id_token(&request)
                    .await
                    .map_err(IdTokenFailure::Issue)?;
                let key = self.services.hasher.hash(&jwt);
                let metadata = self.metadata();
                let token = Token::new(TokenKind::IdToken, jwt, key, lifetime, now)
                    .map_err(IdTokenFailure::Issue)?
                    .with_auth_context_ref(metadata.acr_values)
                    .with_session_ref(metadata.session_ref);
                let token = Arc::new(token);
                self.write_through(&token, false)
                    .await
                    .map_err(IdTokenFailure::Persist)?;
                flag.store(true, Ordering::Release);
                Ok::<_, IdTokenFailure>(token)
            })
            .await;

        match result {
            Ok(token) if minted_here.load(Ordering::Acquire) => {
                self.log_minted(token);
                Ok(Some(Minted::fresh(Arc::clone(token))))
            }
            Ok(token) => Ok(Some(Minted::reused(Arc::clone(token)))),
            Err(IdTokenFailure::Persist(err)) => {
                self.log_issuance_failure(TokenKind::IdToken, &err);
                Ok(None)
            }
            Err(IdTokenFailure::Issue(err)) => Err(err),
        }
    }

    fn id_token_request(
        &self,
        nonce: Option<&str>,
        authorization_code: Option<&str>,
        access_token: Option<&str>,
        now: OffsetDateTime,
        lifetime_secs: i64,
    ) -> IdTokenRequest {
        let metadata = self.metadata.read();
        IdTokenRequest {
            grant_id: self.grant_id.clone(),
            client: self.client.clone(),
            user: self.user.clone(),
            nonce: nonce.map(str::to_string).or_else(|| metadata.nonce.clone()),
            authorization_code: authorization_code.map(str::to_string),
            access_token: access_token.map(str::to_string),
            scopes: metadata.scopes.iter().cloned().collect(),
            acr_values: metadata.acr_values.clone(),
            authentication_time: metadata.authentication_time,
            issued_at: now,
            lifetime_secs,
        }
    }

    /// Marks the authorization code used. Returns `true` only for the call
    /// that consumed it; later calls see `false`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` if the grant has no authorization code, or a
    /// storage error if the record cannot be updated.
    pub async fn consume_authorization_code(&self) -> GrantResult<bool> {
        let code = self
            .authorization_code()
            .ok_or_else(|| GrantError::invalid_grant("grant has no authorization code"))?;
        let first = code.mark_used();
        if first && let GrantBackend::Persistent(store) = &self.backend {
            update_record(store.as_ref(), code.storage_key(), |r| r.used = true).await?;
        }
        Ok(first)
    }

    /// Revokes every token of the grant.
    ///
    /// In-memory and cached grants flag their tokens revoked (they stay
    /// resolvable but invalid); cached grants also drop their snapshot.
    /// Persistent grants delete every record sharing the grant id.
    ///
    /// # Errors
    ///
    /// Returns a storage or cache error from the backend.
    pub async fn revoke_all_tokens(&self) -> GrantResult<()> {
        for token in self.tokens() {
            token.revoke();
        }
        match &self.backend {
            GrantBackend::InMemory => {}
            GrantBackend::Persistent(store) => {
                let removed = store.delete_by_grant_id(&self.grant_id).await?;
                debug!(grant_id = %self.grant_id, removed, "grant records deleted");
            }
            GrantBackend::Cached(cache) => {
                cache
                    .remove(&CacheSnapshot::from_grant(self).cache_key())
                    .await?;
            }
        }
        debug!(grant_id = %self.grant_id, backend = self.backend.name(), "grant revoked");
        Ok(())
    }

    /// Revokes one access or refresh token by storage key. Persistent grants
    /// delete its record.
    ///
    /// # Returns
    ///
    /// `false` if the grant owns no such token.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the backend.
    pub async fn revoke_token(&self, kind: TokenKind, storage_key: &str) -> GrantResult<bool> {
        let Some(token) = self.token_by_storage_key(kind, storage_key) else {
            return Ok(false);
        };
        token.revoke();
        if let GrantBackend::Persistent(store) = &self.backend {
            store.delete(storage_key).await?;
        }
        debug!(grant_id = %self.grant_id, kind = %kind, "token revoked");
        Ok(true)
    }

    /// Runs the expiry check on every owned token. A no-op for persistent
    /// grants, whose records are purged by the backend.
    pub fn check_expired_tokens(&self) {
        if self.backend.is_persistent() {
            return;
        }
        let now = self.services.now();
        for token in self.tokens() {
            token.check_expired(now);
        }
    }

    /// Grant validity.
    ///
    /// In-memory and cached grants are valid while any access, refresh,
    /// ID or long-lived token is valid. Persistent grants always report
    /// `true`: validity is decided per presented token at lookup.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.backend.is_persistent() {
            return true;
        }
        self.access_tokens.iter().any(|e| e.value().is_valid())
            || self.refresh_tokens.iter().any(|e| e.value().is_valid())
            || self.id_token().is_some_and(|t| t.is_valid())
            || self.long_lived_access_token().is_some_and(|t| t.is_valid())
    }

    /// Whether any owned token, authorization code included, is still
    /// valid. Used by expiry sweeps.
    #[must_use]
    pub fn has_live_tokens(&self) -> bool {
        self.tokens().iter().any(|t| t.is_valid())
    }

    /// Persists the mutable correlation fields (nonce, scopes, ACR values,
    /// authentication time, claims, request JWT).
    ///
    /// No-op for in-memory grants. Persistent grants update every record
    /// sharing the grant id. Cached grants rewrite their snapshot.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` for cached grants that are not
    /// authorization code grants, or a storage/cache error.
    pub async fn save(&self) -> GrantResult<()> {
        match &self.backend {
            GrantBackend::InMemory => Ok(()),
            GrantBackend::Cached(cache) => {
                if self.kind != GrantKind::AuthorizationCode {
                    return Err(GrantError::unsupported(format!(
                        "save on cached {} grant",
                        self.kind
                    )));
                }
                let snapshot = CacheSnapshot::from_grant(self);
                snapshot
                    .store(
                        cache.as_ref(),
                        self.services.now(),
                        self.client.effective_access_token_lifetime(
                            self.services.config.tokens.access_token_secs(),
                        ),
                    )
                    .await
            }
            GrantBackend::Persistent(store) => {
                let metadata = self.metadata();
                let scope = metadata.scope_string();
                for mut record in store.find_by_grant_id(&self.grant_id).await? {
                    record.nonce.clone_from(&metadata.nonce);
                    record.scope.clone_from(&scope);
                    record.acr_values.clone_from(&metadata.acr_values);
                    record.authentication_time = metadata.authentication_time;
                    record.claims.clone_from(&metadata.claims);
                    record.jwt_request.clone_from(&metadata.encoded_request_jwt);
                    store.update(&record).await?;
                }
                Ok(())
            }
        }
    }

    /// Applies the scope policy to `requested` (space separated), replaces
    /// the grant's scopes with the result and saves the grant.
    ///
    /// Blank input is returned unchanged without consulting the policy.
    ///
    /// # Returns
    ///
    /// The granted scopes, space-joined in policy order.
    ///
    /// # Errors
    ///
    /// Returns the policy's error or the error from [`Grant::save`].
    pub async fn check_scopes_policy(&self, requested: &str) -> GrantResult<String> {
        if requested.trim().is_empty() {
            return Ok(requested.to_string());
        }
        let requested: Vec<String> = requested.split_whitespace().map(str::to_string).collect();
        let granted = self
            .services
            .scope_policy
            .check_scopes_policy(&self.client, &requested)
            .await?;
        self.metadata.write().scopes = granted.iter().cloned().collect();
        self.save().await?;
        Ok(granted.join(" "))
    }

    async fn sign_access_token(&self, token: Token) -> GrantResult<Token> {
        let signer = self
            .services
            .access_token_signer
            .clone()
            .ok_or_else(|| GrantError::configuration("no access token signer configured"))?;
        let request = {
            let metadata = self.metadata.read();
            AccessTokenRequest {
                grant_id: self.grant_id.clone(),
                client: self.client.clone(),
                user: self.user.clone(),
                scopes: metadata.scopes.iter().cloned().collect(),
                acr_values: metadata.acr_values.clone(),
                authentication_time: metadata.authentication_time,
                issued_at: token.created_at(),
                expires_at: token.expires_at(),
                reference_id: token.reference_id().to_string(),
                confirmation_hash: token.confirmation_hash().map(str::to_string),
            }
        };
        let jwt = signer.sign_access_token(&request).await?;
        let key = self.services.hasher.hash(&jwt);
        Ok(token.with_code(jwt, key))
    }

    fn new_token(&self, kind: TokenKind, lifetime: i64, now: OffsetDateTime) -> GrantResult<Token> {
        let code = self.services.handles.generate();
        let key = self.services.hasher.hash(&code);
        let metadata = self.metadata.read();
        Ok(Token::new(kind, code, key, lifetime, now)?
            .with_auth_context_ref(metadata.acr_values.clone())
            .with_session_ref(metadata.session_ref.clone()))
    }

    /// Writes a record for `token` when the grant is persistent. Tokens
    /// with no remaining lifetime are not written.
    async fn write_through(&self, token: &Token, long_lived: bool) -> GrantResult<()> {
        let GrantBackend::Persistent(store) = &self.backend else {
            return Ok(());
        };
        if token.remaining_seconds(self.services.now()) <= 0 {
            debug!(
                grant_id = %self.grant_id,
                kind = %token.kind(),
                "token already expired, not persisted"
            );
            return Ok(());
        }
        store.create(&self.record_for(token, long_lived)).await
    }

    pub(crate) fn record_for(&self, token: &Token, long_lived: bool) -> TokenRecord {
        let metadata = self.metadata.read();
        let authorization_code = if token.kind() == TokenKind::AuthorizationCode {
            Some(token.storage_key().to_string())
        } else {
            self.authorization_code()
                .map(|c| c.storage_key().to_string())
        };
        TokenRecord {
            grant_id: self.grant_id.clone(),
            token_code: token.storage_key().to_string(),
            client_id: self.client.client_id.clone(),
            user_id: self.user.as_ref().map(|u| u.id.clone()),
            token_type: token.kind().as_str().to_string(),
            grant_type: self.kind.as_str().to_string(),
            reference_id: token.reference_id().to_string(),
            created_at: token.created_at(),
            expires_at: token.expires_at(),
            revoked: token.is_revoked(),
            used: token.is_used(),
            long_lived,
            authorization_code,
            scope: metadata.scope_string(),
            nonce: metadata.nonce.clone(),
            acr_values: metadata.acr_values.clone(),
            session_ref: metadata.session_ref.clone(),
            authentication_time: metadata.authentication_time,
            code_challenge: metadata.code_challenge.clone(),
            code_challenge_method: metadata.code_challenge_method.clone(),
            claims: metadata.claims.clone(),
            jwt_request: metadata.encoded_request_jwt.clone(),
            token_binding_hash: metadata.token_binding_hash.clone(),
            confirmation_hash: token.confirmation_hash().map(str::to_string),
        }
    }

    fn log_minted(&self, token: &Token) {
        // long-lived access tokens stay opaque
        let signed_access = token.kind() == TokenKind::AccessToken
            && self.client.access_token_as_jwt
            && self.access_tokens.contains_key(token.storage_key());
        let format = if signed_access || token.kind() == TokenKind::IdToken {
            "jwt"
        } else {
            "opaque"
        };
        metrics::record_token_issued(token.kind(), self.kind, format);
        debug!(
            grant_id = %self.grant_id,
            client_id = %self.client.client_id,
            kind = %token.kind(),
            backend = self.backend.name(),
            "token minted"
        );
    }

    fn log_issuance_failure(&self, kind: TokenKind, err: &GrantError) {
        warn!(
            grant_id = %self.grant_id,
            client_id = %self.client.client_id,
            kind = %kind,
            error = %err,
            "failed to persist token, no token issued"
        );
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("grant_id", &self.grant_id)
            .field("kind", &self.kind)
            .field("client_id", &self.client.client_id)
            .field("user_id", &self.user.as_ref().map(|u| &u.id))
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

async fn update_record(
    store: &dyn TokenRecordStorage,
    token_code: &str,
    update: impl FnOnce(&mut TokenRecord) + Send,
) -> GrantResult<()> {
    if let Some(mut record) = store.find_by_code(token_code).await? {
        update(&mut record);
        store.update(&record).await?;
    }
    Ok(())
}
