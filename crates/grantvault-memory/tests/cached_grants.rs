//! Authorization-code grants kept in the distributed cache until exchange.

use std::sync::Arc;

use grantvault_core::config::GrantConfig;
use grantvault_core::prelude::*;
use grantvault_core::snapshot::{CacheSnapshot, code_cache_key};
use grantvault_memory::{InMemoryClientDirectory, InMemoryUserDirectory, LocalGrantCache};

fn cached_service(cache: Arc<LocalGrantCache>) -> GrantService {
    let mut config = GrantConfig::default();
    config.cache.enabled = true;

    let users = Arc::new(InMemoryUserDirectory::new());
    users.insert(User::new("user-1", "alice"));
    let clients = Arc::new(InMemoryClientDirectory::new());
    clients.insert(Client::new("app", "App"));

    GrantService::builder()
        .cache(cache)
        .users(users)
        .clients(clients)
        .build(GrantServices::new(config))
        .expect("cached service")
}

async fn code_grant(service: &GrantService) -> (Arc<Grant>, String) {
    let grant = service
        .create_authorization_code_grant(
            User::new("user-1", "alice"),
            Client::new("app", "App"),
            None,
        )
        .await
        .unwrap();
    let code = grant.authorization_code().unwrap().code().to_string();
    (grant, code)
}

#[tokio::test]
async fn test_code_grant_lives_in_cache_until_exchange() {
    let cache = Arc::new(LocalGrantCache::new());
    let service = cached_service(cache.clone());
    let (grant, code) = code_grant(&service).await;

    assert!(matches!(grant.backend(), GrantBackend::Cached(_)));
    assert!(service.grants_by_client("app").await.unwrap().is_empty());
    assert_eq!(cache.stats().size, 1);

    let snapshot = CacheSnapshot::load(cache.as_ref(), &code_cache_key("app", &code))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.grant_id, grant.grant_id());
    assert_eq!(snapshot.code.as_deref(), Some(code.as_str()));
}

#[tokio::test]
async fn test_saved_metadata_survives_resume() {
    let cache = Arc::new(LocalGrantCache::new());
    let service = cached_service(cache);
    let (grant, code) = code_grant(&service).await;

    grant.update_metadata(|m| {
        m.nonce = Some("n-1".to_string());
        m.code_challenge = Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string());
        m.code_challenge_method = Some("S256".to_string());
    });
    grant.save().await.unwrap();

    let resumed = service
        .grant_by_authorization_code("app", &code)
        .await
        .unwrap()
        .expect("cache hit");
    assert_eq!(resumed.grant_id(), grant.grant_id());
    let metadata = resumed.metadata();
    assert_eq!(metadata.nonce.as_deref(), Some("n-1"));
    assert_eq!(metadata.code_challenge_method.as_deref(), Some("S256"));
    let restored = resumed.authorization_code().unwrap();
    let original = grant.authorization_code().unwrap();
    assert_eq!(restored.storage_key(), original.storage_key());
    assert_eq!(restored.expires_at(), original.expires_at());
}

#[tokio::test]
async fn test_another_node_exchanges_the_code() {
    let cache = Arc::new(LocalGrantCache::new());
    let node_a = cached_service(cache.clone());
    let node_b = cached_service(cache.clone());
    let (grant, code) = code_grant(&node_a).await;

    let exchanged = node_b.exchange_authorization_code("app", &code).await.unwrap();
    assert_eq!(exchanged.grant_id(), grant.grant_id());
    assert_eq!(cache.stats().size, 0);

    let access = node_b
        .issue_access_token(&exchanged, None)
        .await
        .unwrap()
        .unwrap();
    let found = node_b
        .grant_by_access_token(access.code())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.grant_id(), grant.grant_id());
}

#[tokio::test]
async fn test_replayed_code_revokes_the_grant() {
    let cache = Arc::new(LocalGrantCache::new());
    let service = cached_service(cache);
    let (_, code) = code_grant(&service).await;

    let exchanged = service.exchange_authorization_code("app", &code).await.unwrap();
    let access = service
        .issue_access_token(&exchanged, None)
        .await
        .unwrap()
        .unwrap();

    let err = service
        .exchange_authorization_code("app", &code)
        .await
        .unwrap_err();
    assert!(matches!(err, GrantError::InvalidGrant { .. }));
    assert!(access.is_revoked());
    assert!(service.grant_by_access_token(access.code()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_code_presented_by_another_client_is_rejected() {
    let cache = Arc::new(LocalGrantCache::new());
    let service = cached_service(cache.clone());
    let (_, code) = code_grant(&service).await;

    assert!(service.exchange_authorization_code("other", &code).await.is_err());
    assert!(
        service
            .grant_by_authorization_code("other", &code)
            .await
            .unwrap()
            .is_none()
    );
    // the rightful client can still exchange
    assert!(service.exchange_authorization_code("app", &code).await.is_ok());
}

#[tokio::test]
async fn test_revoked_cached_grant_drops_its_snapshot() {
    let cache = Arc::new(LocalGrantCache::new());
    let service = cached_service(cache.clone());
    let (grant, code) = code_grant(&service).await;

    service.revoke_grant(&grant).await.unwrap();
    assert_eq!(cache.stats().size, 0);
    assert!(service.exchange_authorization_code("app", &code).await.is_err());
}
