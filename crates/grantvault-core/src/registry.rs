//! Registry trait shared by the in-memory index and the persistent store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::GrantResult;
use crate::grant::{Grant, IndexEvent};
use crate::token::TokenKind;

/// Multi-key lookup of grants by token code and by client.
///
/// Lookup misses are `Ok(None)`, never errors. Implementations:
///
/// - [`GrantIndex`](crate::index::GrantIndex) - in-process, no I/O
/// - [`GrantStore`](crate::store::GrantStore) - backed by a record store
#[async_trait]
pub trait GrantRegistry: Send + Sync {
    /// Makes every token the grant currently owns resolvable.
    ///
    /// Best-effort: the grant's keys become visible one at a time.
    ///
    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    async fn register(&self, grant: &Arc<Grant>) -> GrantResult<()>;

    /// Applies the index events returned by a mint on `grant`.
    ///
    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    async fn apply(&self, grant: &Arc<Grant>, events: &[IndexEvent]) -> GrantResult<()>;

    /// Returns the grant owning the token presented as `code`, only if that
    /// token is still valid.
    ///
    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    async fn resolve(&self, kind: TokenKind, code: &str) -> GrantResult<Option<Arc<Grant>>>;

    /// Returns the grant owning the token presented as `code` regardless of
    /// the token's validity.
    ///
    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    async fn find(&self, kind: TokenKind, code: &str) -> GrantResult<Option<Arc<Grant>>>;

    /// Lists the grants issued to a client.
    ///
    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    async fn grants_by_client(&self, client_id: &str) -> GrantResult<Vec<Arc<Grant>>>;

    /// Removes grants and every key that points at them.
    ///
    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    async fn remove(&self, grants: &[Arc<Grant>]) -> GrantResult<()>;

    /// Drops grants without live tokens.
    ///
    /// # Returns
    ///
    /// The number of grants (in-memory) or records (persistent) removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error for persistent registries.
    async fn cleanup_expired(&self) -> GrantResult<u64>;
}
