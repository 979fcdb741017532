//! Distributed cache storage trait.

use async_trait::async_trait;

use crate::GrantResult;

/// Key/value cache holding serialized grant snapshots.
///
/// Entries carry their own TTL; an expired entry must behave as absent.
#[async_trait]
pub trait GrantCache: Send + Sync {
    /// Stores `value` under `key` for `ttl_secs` seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be reached.
    async fn put(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> GrantResult<()>;

    /// Fetches the value stored under `key`.
    ///
    /// # Returns
    ///
    /// `Some(bytes)` on a hit, `None` on a miss or after expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be reached.
    async fn get(&self, key: &str) -> GrantResult<Option<Vec<u8>>>;

    /// Removes the entry under `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be reached.
    async fn remove(&self, key: &str) -> GrantResult<()>;
}
