//! In-memory user and client directories.

use async_trait::async_trait;
use dashmap::DashMap;
use grantvault_core::GrantResult;
use grantvault_core::storage::{ClientDirectory, UserDirectory};
use grantvault_core::types::{Client, User};

/// Users keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<String, User>,
}

impl InMemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn insert(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn remove(&self, user_id: &str) -> Option<User> {
        self.users.remove(user_id).map(|(_, user)| user)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, user_id: &str) -> GrantResult<Option<User>> {
        Ok(self.users.get(user_id).map(|e| e.value().clone()))
    }
}

/// Clients keyed by `client_id`.
#[derive(Debug, Default)]
pub struct InMemoryClientDirectory {
    clients: DashMap<String, Client>,
}

impl InMemoryClientDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a client.
    pub fn insert(&self, client: Client) {
        self.clients.insert(client.client_id.clone(), client);
    }

    pub fn remove(&self, client_id: &str) -> Option<Client> {
        self.clients.remove(client_id).map(|(_, client)| client)
    }
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn find_client(&self, client_id: &str) -> GrantResult<Option<Client>> {
        Ok(self.clients.get(client_id).map(|e| e.value().clone()))
    }
}
