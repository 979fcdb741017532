//! Persistence-backed grant registry.
//!
//! [`GrantStore`] answers the same questions as
//! [`GrantIndex`](crate::index::GrantIndex) from a [`TokenRecordStorage`].
//! Grants are not kept in memory: every lookup fetches the records of the
//! owning grant and rebuilds it, re-resolving the client and user through
//! the directories.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::GrantResult;
use crate::factory::GrantFactory;
use crate::grant::{Grant, GrantBackend, GrantKind, GrantMetadata, IndexEvent};
use crate::registry::GrantRegistry;
use crate::services::GrantServices;
use crate::storage::{ClientDirectory, TokenRecord, TokenRecordStorage, UserDirectory};
use crate::token::{Token, TokenKind};

/// Registry over persisted token records.
#[derive(Clone)]
pub struct GrantStore {
    storage: Arc<dyn TokenRecordStorage>,
    users: Arc<dyn UserDirectory>,
    clients: Arc<dyn ClientDirectory>,
    services: GrantServices,
}

impl GrantStore {
    #[must_use]
    pub fn new(
        storage: Arc<dyn TokenRecordStorage>,
        users: Arc<dyn UserDirectory>,
        clients: Arc<dyn ClientDirectory>,
        services: GrantServices,
    ) -> Self {
        Self {
            storage,
            users,
            clients,
            services,
        }
    }

    pub fn storage(&self) -> &Arc<dyn TokenRecordStorage> {
        &self.storage
    }

    /// Factory building grants that write through to this store.
    #[must_use]
    pub fn factory(&self) -> GrantFactory {
        GrantFactory::new(
            self.services.clone(),
            GrantBackend::Persistent(Arc::clone(&self.storage)),
        )
    }

    /// Rebuilds the grant owning `code` together with the presented token.
    async fn load(
        &self,
        kind: TokenKind,
        code: &str,
    ) -> GrantResult<Option<(Arc<Grant>, Arc<Token>)>> {
        let key = self.services.hasher.hash(code);
        let Some(record) = self.storage.find_by_code(&key).await? else {
            return Ok(None);
        };
        if record.token_type != kind.as_str() {
            debug!(
                grant_id = %record.grant_id,
                expected = %kind,
                found = %record.token_type,
                "token type mismatch"
            );
            return Ok(None);
        }

        let records = self.storage.find_by_grant_id(&record.grant_id).await?;
        let presented = Some((key.as_str(), code));
        let Some(grant) = self.rehydrate(&record, &records, presented).await? else {
            return Ok(None);
        };
        Ok(grant
            .token_by_storage_key(kind, &key)
            .map(|token| (grant, token)))
    }

    /// Rebuilds a grant from its records. `head` supplies the grant-level
    /// fields; `presented` is the `(storage_key, code)` pair whose raw code
    /// is known.
    ///
    /// Returns `None` with a warning if the grant type is unknown or the
    /// client or user no longer exists.
    async fn rehydrate(
        &self,
        head: &TokenRecord,
        records: &[TokenRecord],
        presented: Option<(&str, &str)>,
    ) -> GrantResult<Option<Arc<Grant>>> {
        let Some(kind) = GrantKind::from_grant_type(&head.grant_type) else {
            warn!(
                grant_id = %head.grant_id,
                grant_type = %head.grant_type,
                "unknown grant type in token record"
            );
            return Ok(None);
        };
        let Some(client) = self.clients.find_client(&head.client_id).await? else {
            warn!(
                grant_id = %head.grant_id,
                client_id = %head.client_id,
                "client of stored grant not found"
            );
            return Ok(None);
        };
        let user = match &head.user_id {
            Some(user_id) => match self.users.find_user(user_id).await? {
                Some(user) => Some(user),
                None => {
                    warn!(grant_id = %head.grant_id, "user of stored grant not found");
                    return Ok(None);
                }
            },
            None => None,
        };

        let grant = Grant::assemble(
            head.grant_id.clone(),
            kind,
            user,
            client,
            self.services.clone(),
            GrantBackend::Persistent(Arc::clone(&self.storage)),
            metadata_from(head),
        );
        for record in records {
            let Ok(token_kind) = record.token_type.parse::<TokenKind>() else {
                warn!(
                    grant_id = %record.grant_id,
                    token_type = %record.token_type,
                    "skipping record with unknown token type"
                );
                continue;
            };
            let code = match presented {
                Some((key, code)) if key == record.token_code => code.to_string(),
                _ => record.token_code.clone(),
            };
            let token = Token::restore(
                token_kind,
                code,
                record.token_code.clone(),
                record.created_at,
                record.expires_at,
            )
            .with_reference_id(record.reference_id.clone())
            .with_auth_context_ref(record.acr_values.clone())
            .with_session_ref(record.session_ref.clone())
            .with_confirmation_hash(record.confirmation_hash.clone());
            if record.revoked {
                token.revoke();
            }
            if record.used {
                let _ = token.mark_used();
            }
            grant.adopt_token(Arc::new(token), record.long_lived);
        }
        trace!(grant_id = %head.grant_id, records = records.len(), "grant rehydrated");
        Ok(Some(Arc::new(grant)))
    }
}

fn metadata_from(record: &TokenRecord) -> GrantMetadata {
    GrantMetadata {
        scopes: record.scope.split_whitespace().map(str::to_string).collect(),
        authentication_time: record.authentication_time,
        nonce: record.nonce.clone(),
        code_challenge: record.code_challenge.clone(),
        code_challenge_method: record.code_challenge_method.clone(),
        token_binding_hash: record.token_binding_hash.clone(),
        acr_values: record.acr_values.clone(),
        session_ref: record.session_ref.clone(),
        claims: record.claims.clone(),
        encoded_request_jwt: record.jwt_request.clone(),
    }
}

#[async_trait]
impl GrantRegistry for GrantStore {
    async fn register(&self, grant: &Arc<Grant>) -> GrantResult<()> {
        // records are written by the mints themselves
        if !grant.backend().is_persistent() {
            debug!(
                grant_id = %grant.grant_id(),
                backend = grant.backend().name(),
                "grant is not persistent, not registered"
            );
        }
        Ok(())
    }

    async fn apply(&self, _grant: &Arc<Grant>, _events: &[IndexEvent]) -> GrantResult<()> {
        Ok(())
    }

    async fn resolve(&self, kind: TokenKind, code: &str) -> GrantResult<Option<Arc<Grant>>> {
        let now = self.services.now();
        Ok(self
            .load(kind, code)
            .await?
            .filter(|(_, token)| token.is_valid_at(now))
            .map(|(grant, _)| grant))
    }

    async fn find(&self, kind: TokenKind, code: &str) -> GrantResult<Option<Arc<Grant>>> {
        Ok(self.load(kind, code).await?.map(|(grant, _)| grant))
    }

    async fn grants_by_client(&self, client_id: &str) -> GrantResult<Vec<Arc<Grant>>> {
        let mut by_grant: IndexMap<String, Vec<TokenRecord>> = IndexMap::new();
        for record in self.storage.find_by_client(client_id).await? {
            by_grant
                .entry(record.grant_id.clone())
                .or_default()
                .push(record);
        }

        let mut grants = Vec::with_capacity(by_grant.len());
        for records in by_grant.values() {
            if let Some(grant) = self.rehydrate(&records[0], records, None).await? {
                grants.push(grant);
            }
        }
        Ok(grants)
    }

    async fn remove(&self, grants: &[Arc<Grant>]) -> GrantResult<()> {
        for grant in grants {
            let removed = self.storage.delete_by_grant_id(grant.grant_id()).await?;
            debug!(grant_id = %grant.grant_id(), removed, "grant records deleted");
        }
        Ok(())
    }

    async fn cleanup_expired(&self) -> GrantResult<u64> {
        let purged = self.storage.cleanup_expired(self.services.now()).await?;
        debug!(purged, "expired token records purged");
        Ok(purged)
    }
}

impl std::fmt::Debug for GrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantStore").finish_non_exhaustive()
    }
}
