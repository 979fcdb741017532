//! In-memory grant index.
//!
//! Four `DashMap`s map token storage keys to their owning grant, one per
//! token kind, and a client multimap lists grants per client.
//!
//! # Consistency
//!
//! Each map has per-key atomicity; nothing spans keys. Registering a grant
//! inserts its keys one by one, so a reader may briefly see the access
//! token indexed before the refresh token. Stale entries (expired or
//! revoked tokens) stay until [`GrantIndex::remove`] or
//! [`GrantIndex::cleanup_expired`] drops them; lookups re-check validity.
//!
//! The client multimap sits behind a single mutex. Under heavy concurrent
//! registration it is the throughput ceiling of the index (see the
//! `index_bench` benchmark).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::GrantResult;
use crate::clock::Clock;
use crate::grant::{Grant, IndexEvent};
use crate::registry::GrantRegistry;
use crate::services::GrantServices;
use crate::token::{TokenHasher, TokenKind};

type KeyMap = DashMap<String, Arc<Grant>>;

/// In-process registry of grants.
pub struct GrantIndex {
    hasher: Arc<dyn TokenHasher>,
    clock: Arc<dyn Clock>,
    by_code: KeyMap,
    by_access_token: KeyMap,
    by_refresh_token: KeyMap,
    by_id_token: KeyMap,
    by_client: Mutex<HashMap<String, IndexMap<String, Arc<Grant>>>>,
}

impl GrantIndex {
    #[must_use]
    pub fn new(services: &GrantServices) -> Self {
        Self {
            hasher: Arc::clone(&services.hasher),
            clock: Arc::clone(&services.clock),
            by_code: DashMap::new(),
            by_access_token: DashMap::new(),
            by_refresh_token: DashMap::new(),
            by_id_token: DashMap::new(),
            by_client: Mutex::new(HashMap::new()),
        }
    }

    fn map(&self, kind: TokenKind) -> &KeyMap {
        match kind {
            TokenKind::AuthorizationCode => &self.by_code,
            TokenKind::AccessToken => &self.by_access_token,
            TokenKind::RefreshToken => &self.by_refresh_token,
            TokenKind::IdToken => &self.by_id_token,
        }
    }

    /// Indexes every token the grant owns and its client entry.
    pub fn register(&self, grant: &Arc<Grant>) {
        for token in grant.tokens() {
            self.map(token.kind())
                .insert(token.storage_key().to_string(), Arc::clone(grant));
        }
        self.by_client
            .lock()
            .entry(grant.client().client_id.clone())
            .or_default()
            .insert(grant.grant_id().to_string(), Arc::clone(grant));
    }

    /// Applies mint events for `grant`.
    pub fn apply(&self, grant: &Arc<Grant>, events: &[IndexEvent]) {
        for event in events {
            match event {
                IndexEvent::TokenMinted { kind, storage_key } => {
                    self.map(*kind)
                        .insert(storage_key.clone(), Arc::clone(grant));
                }
                IndexEvent::TokenDropped { kind, storage_key } => {
                    self.map(*kind)
                        .remove_if(storage_key, |_, owner| Arc::ptr_eq(owner, grant));
                }
            }
        }
    }

    /// Finds the grant owning `code` without checking the token's validity.
    #[must_use]
    pub fn find(&self, kind: TokenKind, code: &str) -> Option<Arc<Grant>> {
        let key = self.hasher.hash(code);
        self.map(kind).get(&key).map(|e| Arc::clone(e.value()))
    }

    /// Finds the grant owning `code` if that token is still valid now.
    #[must_use]
    pub fn resolve(&self, kind: TokenKind, code: &str) -> Option<Arc<Grant>> {
        let key = self.hasher.hash(code);
        let grant = self.map(kind).get(&key).map(|e| Arc::clone(e.value()))?;
        let now = self.clock.now();
        grant
            .token_by_storage_key(kind, &key)
            .filter(|token| token.is_valid_at(now))
            .map(|_| grant)
    }

    #[must_use]
    pub fn grants_by_client(&self, client_id: &str) -> Vec<Arc<Grant>> {
        self.by_client
            .lock()
            .get(client_id)
            .map(|grants| grants.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes grants and the keys of every token they own.
    ///
    /// Keys of replaced long-lived tokens are already gone through their
    /// `TokenDropped` event. A key re-registered by another grant is kept.
    pub fn remove(&self, grants: &[Arc<Grant>]) {
        for grant in grants {
            for token in grant.tokens() {
                self.map(token.kind())
                    .remove_if(token.storage_key(), |_, owner| {
                        owner.grant_id() == grant.grant_id()
                    });
            }
        }

        let mut by_client = self.by_client.lock();
        for grant in grants {
            let client_id = &grant.client().client_id;
            if let Some(entries) = by_client.get_mut(client_id) {
                entries.shift_remove(grant.grant_id());
                if entries.is_empty() {
                    by_client.remove(client_id);
                }
            }
        }
        debug!(removed = grants.len(), "grants removed from index");
    }

    /// Runs the expiry check on every indexed grant and removes grants with
    /// no live token left.
    ///
    /// # Returns
    ///
    /// The number of grants removed.
    pub fn cleanup_expired(&self) -> usize {
        let grants: Vec<Arc<Grant>> = self
            .by_client
            .lock()
            .values()
            .flat_map(|entries| entries.values().cloned())
            .collect();

        let stale: Vec<Arc<Grant>> = grants
            .into_iter()
            .filter(|grant| {
                grant.check_expired_tokens();
                !grant.has_live_tokens()
            })
            .collect();
        if !stale.is_empty() {
            self.remove(&stale);
        }
        stale.len()
    }

    /// Number of indexed grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_client.lock().values().map(IndexMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GrantRegistry for GrantIndex {
    async fn register(&self, grant: &Arc<Grant>) -> GrantResult<()> {
        GrantIndex::register(self, grant);
        Ok(())
    }

    async fn apply(&self, grant: &Arc<Grant>, events: &[IndexEvent]) -> GrantResult<()> {
        GrantIndex::apply(self, grant, events);
        Ok(())
    }

    async fn resolve(&self, kind: TokenKind, code: &str) -> GrantResult<Option<Arc<Grant>>> {
        Ok(GrantIndex::resolve(self, kind, code))
    }

    async fn find(&self, kind: TokenKind, code: &str) -> GrantResult<Option<Arc<Grant>>> {
        Ok(GrantIndex::find(self, kind, code))
    }

    async fn grants_by_client(&self, client_id: &str) -> GrantResult<Vec<Arc<Grant>>> {
        Ok(GrantIndex::grants_by_client(self, client_id))
    }

    async fn remove(&self, grants: &[Arc<Grant>]) -> GrantResult<()> {
        GrantIndex::remove(self, grants);
        Ok(())
    }

    async fn cleanup_expired(&self) -> GrantResult<u64> {
        Ok(GrantIndex::cleanup_expired(self) as u64)
    }
}

impl std::fmt::Debug for GrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantIndex")
            .field("authorization_codes", &self.by_code.len())
            .field("access_tokens", &self.by_access_token.len())
            .field("refresh_tokens", &self.by_refresh_token.len())
            .field("id_tokens", &self.by_id_token.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::GrantConfig;
    use crate::factory::GrantFactory;
    use crate::grant::GrantBackend;
    use crate::token::jwt::{JwtIdTokenIssuer, JwtService, SigningKeyPair};
    use crate::types::{Client, User};
    use time::{Duration, OffsetDateTime};

    fn services(clock: Arc<ManualClock>) -> GrantServices {
        let key_pair = SigningKeyPair::generate_ec().unwrap();
        GrantServices::new(GrantConfig::default())
            .with_clock(clock)
            .with_id_token_issuer(Arc::new(JwtIdTokenIssuer::new(JwtService::new(
                key_pair,
                "https://auth.example.com",
            ))))
    }

    async fn grant_with_tokens(
        factory: &GrantFactory,
        client_id: &str,
    ) -> (Arc<Grant>, String, String, String) {
        let grant = factory
            .authorization_code_grant(
                User::new("user-1", "alice"),
                Client::new(client_id, "App"),
                None,
            )
            .await
            .unwrap();
        let access = grant.mint_access_token(None).await.unwrap().unwrap();
        let refresh = grant.mint_refresh_token().await.unwrap().unwrap();
        let id = grant
            .mint_id_token(None, None, Some(access.token.code()))
            .await
            .unwrap()
            .unwrap();
        (
            grant,
            access.token.code().to_string(),
            refresh.token.code().to_string(),
            id.token.code().to_string(),
        )
    }

    #[tokio::test]
    async fn test_register_resolve_and_remove() {
        let clock = Arc::new(ManualClock::starting_now());
        let services = services(clock);
        let index = GrantIndex::new(&services);
        let factory = GrantFactory::new(services, GrantBackend::InMemory);

        let (grant, access, refresh, id) = grant_with_tokens(&factory, "app").await;
        index.register(&grant);

        for (kind, code) in [
            (TokenKind::AccessToken, &access),
            (TokenKind::RefreshToken, &refresh),
            (TokenKind::IdToken, &id),
        ] {
            let found = index.resolve(kind, code).unwrap();
            assert_eq!(found.grant_id(), grant.grant_id());
        }
        let code = grant.authorization_code().unwrap();
        assert!(index.resolve(TokenKind::AuthorizationCode, code.code()).is_some());

        index.remove(&[Arc::clone(&grant)]);
        assert!(index.resolve(TokenKind::AccessToken, &access).is_none());
        assert!(index.resolve(TokenKind::RefreshToken, &refresh).is_none());
        assert!(index.resolve(TokenKind::IdToken, &id).is_none());
        assert!(index.grants_by_client("app").is_empty());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_remove_drops_rotated_keys_and_spares_other_grants() {
        let clock = Arc::new(ManualClock::starting_now());
        let services = services(clock);
        let index = GrantIndex::new(&services);
        let factory = GrantFactory::new(services, GrantBackend::InMemory);

        let (grant, _, old_refresh, _) = grant_with_tokens(&factory, "app").await;
        let (other, other_access, ..) = grant_with_tokens(&factory, "app").await;
        index.register(&grant);
        index.register(&other);

        let rotated = grant.mint_refresh_token().await.unwrap().unwrap();
        index.apply(&grant, &rotated.events);

        index.remove(&[Arc::clone(&grant)]);
        assert!(index.find(TokenKind::RefreshToken, &old_refresh).is_none());
        assert!(index.find(TokenKind::RefreshToken, rotated.token.code()).is_none());
        assert!(index.resolve(TokenKind::AccessToken, &other_access).is_some());
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_events_index_new_tokens() {
        let clock = Arc::new(ManualClock::starting_now());
        let services = services(clock);
        let index = GrantIndex::new(&services);
        let factory = GrantFactory::new(services, GrantBackend::InMemory);

        let grant = factory
            .client_credentials_grant(Client::new("svc", "Service"))
            .await
            .unwrap();
        index.register(&grant);

        let minted = grant.mint_access_token(None).await.unwrap().unwrap();
        assert!(index.resolve(TokenKind::AccessToken, minted.token.code()).is_none());

        index.apply(&grant, &minted.events);
        assert!(index.resolve(TokenKind::AccessToken, minted.token.code()).is_some());
    }

    #[tokio::test]
    async fn test_resolve_rechecks_validity_without_pruning() {
        let clock = Arc::new(ManualClock::starting_now());
        let services = services(Arc::clone(&clock));
        let index = GrantIndex::new(&services);
        let factory = GrantFactory::new(services, GrantBackend::InMemory);

        let (grant, access, refresh, _) = grant_with_tokens(&factory, "app").await;
        index.register(&grant);

        // revoked refresh token: not resolvable, still indexed
        grant.mint_refresh_token().await.unwrap();
        assert!(index.resolve(TokenKind::RefreshToken, &refresh).is_none());
        assert!(index.find(TokenKind::RefreshToken, &refresh).is_some());

        // expired access token
        clock.advance(Duration::seconds(3601));
        assert!(index.resolve(TokenKind::AccessToken, &access).is_none());
        assert!(index.find(TokenKind::AccessToken, &access).is_some());
    }

    #[tokio::test]
    async fn test_raw_storage_key_does_not_resolve() {
        let clock = Arc::new(ManualClock::starting_now());
        let services = services(clock);
        let index = GrantIndex::new(&services);
        let factory = GrantFactory::new(services, GrantBackend::InMemory);

        let (grant, _, _, _) = grant_with_tokens(&factory, "app").await;
        index.register(&grant);

        let key = grant.access_tokens()[0].storage_key().to_string();
        assert!(index.resolve(TokenKind::AccessToken, &key).is_none());
    }

    #[tokio::test]
    async fn test_grants_by_client() {
        let clock = Arc::new(ManualClock::starting_now());
        let services = services(clock);
        let index = GrantIndex::new(&services);
        let factory = GrantFactory::new(services, GrantBackend::InMemory);

        let (a, ..) = grant_with_tokens(&factory, "app").await;
        let (b, ..) = grant_with_tokens(&factory, "app").await;
        let (c, ..) = grant_with_tokens(&factory, "other").await;
        for grant in [&a, &b, &c] {
            index.register(grant);
        }

        let ids: Vec<String> = index
            .grants_by_client("app")
            .iter()
            .map(|g| g.grant_id().to_string())
            .collect();
        assert_eq!(ids, vec![a.grant_id().to_string(), b.grant_id().to_string()]);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_cleanup_expired_removes_dead_grants() {
        let start = OffsetDateTime::now_utc();
        let clock = Arc::new(ManualClock::new(start));
        let services = services(Arc::clone(&clock));
        let index = GrantIndex::new(&services);
        let factory = GrantFactory::new(services, GrantBackend::InMemory);

        let short = factory
            .client_credentials_grant(Client::new("svc", "Service"))
            .await
            .unwrap();
        short.mint_access_token(None).await.unwrap();
        index.register(&short);

        let (long, ..) = grant_with_tokens(&factory, "app").await;
        index.register(&long);

        clock.advance(Duration::hours(2));
        assert_eq!(index.cleanup_expired(), 1);
        assert!(index.grants_by_client("svc").is_empty());
        // refresh token keeps the other grant alive
        assert_eq!(index.grants_by_client("app").len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let clock = Arc::new(ManualClock::starting_now());
        let services = services(clock);
        let index = Arc::new(GrantIndex::new(&services));
        let factory = GrantFactory::new(services, GrantBackend::InMemory);

        let mut handles = Vec::new();
        for i in 0..32 {
            let index = Arc::clone(&index);
            let factory = factory.clone();
            handles.push(tokio::spawn(async move {
                let grant = factory
                    .client_credentials_grant(Client::new(format!("client-{}", i % 4), "App"))
                    .await
                    .unwrap();
                let minted = grant.mint_access_token(None).await.unwrap().unwrap();
                index.register(&grant);
                minted.token.code().to_string()
            }));
        }

        let codes = futures_util::future::join_all(handles).await;
        for code in codes {
            let code = code.unwrap();
            assert!(index.resolve(TokenKind::AccessToken, &code).is_some());
        }
        assert_eq!(index.len(), 32);
        assert_eq!(index.grants_by_client("client-0").len(), 8);
    }
}
