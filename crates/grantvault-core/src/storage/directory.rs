//! User and client directory traits.
//!
//! Persistent and cached grants only store identifiers; these directories
//! resolve them back into full records when a grant is rehydrated.

use async_trait::async_trait;

use crate::GrantResult;
use crate::types::{Client, User};

/// Resolves user identifiers.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Finds a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be queried.
    async fn find_user(&self, user_id: &str) -> GrantResult<Option<User>>;
}

/// Resolves client identifiers.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    /// Finds a client by `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be queried.
    async fn find_client(&self, client_id: &str) -> GrantResult<Option<Client>>;
}
