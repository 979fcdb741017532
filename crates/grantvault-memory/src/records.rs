//! DashMap-backed token record storage.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use grantvault_core::storage::{TokenRecord, TokenRecordStorage};
use grantvault_core::{GrantError, GrantResult};
use time::OffsetDateTime;
use tracing::debug;

/// Token records keyed by `token_code`.
///
/// Lookups by grant id and client id scan the map; the store is sized for
/// development and single-node use.
#[derive(Debug, Default)]
pub struct MemoryTokenRecordStorage {
    records: DashMap<String, TokenRecord>,
    unavailable: AtomicBool,
}

impl MemoryTokenRecordStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with a storage error until reset.
    /// Simulates an unreachable database.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every stored record, in no particular order.
    #[must_use]
    pub fn all(&self) -> Vec<TokenRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    fn ensure_available(&self) -> GrantResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GrantError::storage("token record storage unavailable"));
        }
        Ok(())
    }

    fn collect(&self, predicate: impl Fn(&TokenRecord) -> bool) -> Vec<TokenRecord> {
        let mut records: Vec<TokenRecord> = self
            .records
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }
}

#[async_trait]
impl TokenRecordStorage for MemoryTokenRecordStorage {
    async fn create(&self, record: &TokenRecord) -> GrantResult<()> {
        self.ensure_available()?;
        match self.records.entry(record.token_code.clone()) {
            Entry::Occupied(_) => Err(GrantError::storage("duplicate token code")),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn find_by_code(&self, token_code: &str) -> GrantResult<Option<TokenRecord>> {
        self.ensure_available()?;
        Ok(self.records.get(token_code).map(|e| e.value().clone()))
    }

    async fn find_by_grant_id(&self, grant_id: &str) -> GrantResult<Vec<TokenRecord>> {
        self.ensure_available()?;
        Ok(self.collect(|r| r.grant_id == grant_id))
    }

    async fn find_by_client(&self, client_id: &str) -> GrantResult<Vec<TokenRecord>> {
        self.ensure_available()?;
        Ok(self.collect(|r| r.client_id == client_id))
    }

    async fn update(&self, record: &TokenRecord) -> GrantResult<()> {
        self.ensure_available()?;
        match self.records.get_mut(&record.token_code) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(GrantError::storage("token record not found")),
        }
    }

    async fn delete(&self, token_code: &str) -> GrantResult<()> {
        self.ensure_available()?;
        self.records.remove(token_code);
        Ok(())
    }

    async fn delete_by_grant_id(&self, grant_id: &str) -> GrantResult<u64> {
        self.ensure_available()?;
        let before = self.records.len();
        self.records.retain(|_, r| r.grant_id != grant_id);
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn cleanup_expired(&self, now: OffsetDateTime) -> GrantResult<u64> {
        self.ensure_available()?;
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired_at(now));
        let purged = before.saturating_sub(self.records.len()) as u64;
        if purged > 0 {
            debug!(purged, "expired token records removed");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn record(token_code: &str, grant_id: &str, expires_in: Duration) -> TokenRecord {
        let now = OffsetDateTime::now_utc();
        TokenRecord {
            grant_id: grant_id.to_string(),
            token_code: token_code.to_string(),
            client_id: "app".to_string(),
            user_id: Some("user-1".to_string()),
            token_type: "access_token".to_string(),
            grant_type: "authorization_code".to_string(),
            reference_id: format!("ref-{token_code}"),
            created_at: now,
            expires_at: now + expires_in,
            revoked: false,
            used: false,
            long_lived: false,
            authorization_code: None,
            scope: "openid".to_string(),
            nonce: None,
            acr_values: None,
            session_ref: None,
            authentication_time: None,
            code_challenge: None,
            code_challenge_method: None,
            claims: None,
            jwt_request: None,
            token_binding_hash: None,
            confirmation_hash: None,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_code() {
        let storage = MemoryTokenRecordStorage::new();
        storage.create(&record("k1", "g1", Duration::hours(1))).await.unwrap();
        assert!(storage.create(&record("k1", "g2", Duration::hours(1))).await.is_err());
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_grant_id_removes_all_records() {
        let storage = MemoryTokenRecordStorage::new();
        for (code, grant) in [("k1", "g1"), ("k2", "g1"), ("k3", "g2")] {
            storage.create(&record(code, grant, Duration::hours(1))).await.unwrap();
        }

        assert_eq!(storage.delete_by_grant_id("g1").await.unwrap(), 2);
        assert!(storage.find_by_grant_id("g1").await.unwrap().is_empty());
        assert_eq!(storage.find_by_client("app").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let storage = MemoryTokenRecordStorage::new();
        let mut r = record("k1", "g1", Duration::hours(1));
        assert!(storage.update(&r).await.is_err());

        storage.create(&r).await.unwrap();
        r.revoked = true;
        storage.update(&r).await.unwrap();
        assert!(storage.find_by_code("k1").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let storage = MemoryTokenRecordStorage::new();
        storage.create(&record("old", "g1", Duration::seconds(-5))).await.unwrap();
        storage.create(&record("new", "g1", Duration::hours(1))).await.unwrap();

        let purged = storage.cleanup_expired(OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(storage.find_by_code("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_storage_fails() {
        let storage = MemoryTokenRecordStorage::new();
        storage.set_unavailable(true);
        let err = storage
            .create(&record("k1", "g1", Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantError::Storage { .. }));

        storage.set_unavailable(false);
        assert!(storage.find_by_code("k1").await.unwrap().is_none());
    }
}
