//! Collaborators a grant needs to mint tokens.
//!
//! [`GrantServices`] bundles the configuration, clock, hashing, handle
//! generation, scope policy, ID token issuer and access token signer. It is
//! built once by the composition root and shared by every grant.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::GrantResult;
use crate::clock::{Clock, SystemClock};
use crate::config::GrantConfig;
use crate::token::{HandleGenerator, RandomHandleGenerator, Sha256TokenHasher, TokenHasher};
use crate::types::{Client, User};

/// Decides which of the requested scopes a client is granted.
#[async_trait]
pub trait ScopePolicy: Send + Sync {
    /// Returns the granted scopes, in the order they should be reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy cannot be evaluated.
    async fn check_scopes_policy(
        &self,
        client: &Client,
        requested: &[String],
    ) -> GrantResult<Vec<String>>;
}

/// Grants the requested scopes the client is registered for.
///
/// An empty client scope list allows every scope. Duplicates are dropped,
/// first occurrence wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientScopePolicy;

#[async_trait]
impl ScopePolicy for ClientScopePolicy {
    async fn check_scopes_policy(
        &self,
        client: &Client,
        requested: &[String],
    ) -> GrantResult<Vec<String>> {
        let mut granted: Vec<String> = Vec::with_capacity(requested.len());
        for scope in requested {
            let allowed = client.scopes.is_empty() || client.scopes.contains(scope);
            if allowed && !granted.contains(scope) {
                granted.push(scope.clone());
            }
        }
        Ok(granted)
    }
}

/// Inputs for signing an ID token.
#[derive(Debug, Clone)]
pub struct IdTokenRequest {
    pub grant_id: String,
    pub client: Client,
    pub user: Option<User>,
    pub nonce: Option<String>,
    /// Raw authorization code, for `c_hash`.
    pub authorization_code: Option<String>,
    /// Raw access token, for `at_hash`.
    pub access_token: Option<String>,
    pub scopes: Vec<String>,
    pub acr_values: Option<String>,
    pub authentication_time: Option<OffsetDateTime>,
    pub issued_at: OffsetDateTime,
    pub lifetime_secs: i64,
}

/// Produces the compact serialization of an ID token.
///
/// Implementations choose between a signed and an encrypted token based on
/// the client's registration.
#[async_trait]
pub trait IdTokenIssuer: Send + Sync {
    /// Issues an ID token.
    ///
    /// # Errors
    ///
    /// Returns `GrantError::Issuance` if the token cannot be produced.
    async fn issue_id_token(&self, request: &IdTokenRequest) -> GrantResult<String>;
}

/// Inputs for an access token issued as a JWT.
#[derive(Debug, Clone)]
pub struct AccessTokenRequest {
    pub grant_id: String,
    pub client: Client,
    pub user: Option<User>,
    pub scopes: Vec<String>,
    pub acr_values: Option<String>,
    pub authentication_time: Option<OffsetDateTime>,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// Token reference id, becomes `jti`.
    pub reference_id: String,
    /// Certificate thumbprint of a bound token (`x5t#S256`).
    pub confirmation_hash: Option<String>,
}

/// Signs access tokens for clients registered with `access_token_as_jwt`.
#[async_trait]
pub trait AccessTokenSigner: Send + Sync {
    /// # Errors
    ///
    /// Returns `GrantError::Issuance` if the token cannot be signed.
    async fn sign_access_token(&self, request: &AccessTokenRequest) -> GrantResult<String>;
}

/// Collaborators shared by every grant.
#[derive(Clone)]
pub struct GrantServices {
    pub config: Arc<GrantConfig>,
    pub clock: Arc<dyn Clock>,
    pub hasher: Arc<dyn TokenHasher>,
    pub handles: Arc<dyn HandleGenerator>,
    pub scope_policy: Arc<dyn ScopePolicy>,
    pub id_token_issuer: Option<Arc<dyn IdTokenIssuer>>,
    pub access_token_signer: Option<Arc<dyn AccessTokenSigner>>,
}

impl GrantServices {
    /// Creates services with the default collaborators: system clock,
    /// SHA-256 hashing, random handles, client allow-list scope policy and
    /// no JWT signers.
    #[must_use]
    pub fn new(config: GrantConfig) -> Self {
        Self {
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            hasher: Arc::new(Sha256TokenHasher),
            handles: Arc::new(RandomHandleGenerator),
            scope_policy: Arc::new(ClientScopePolicy),
            id_token_issuer: None,
            access_token_signer: None,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn TokenHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn with_handles(mut self, handles: Arc<dyn HandleGenerator>) -> Self {
        self.handles = handles;
        self
    }

    #[must_use]
    pub fn with_scope_policy(mut self, policy: Arc<dyn ScopePolicy>) -> Self {
        self.scope_policy = policy;
        self
    }

    #[must_use]
    pub fn with_id_token_issuer(mut self, issuer: Arc<dyn IdTokenIssuer>) -> Self {
        self.id_token_issuer = Some(issuer);
        self
    }

    #[must_use]
    pub fn with_access_token_signer(mut self, signer: Arc<dyn AccessTokenSigner>) -> Self {
        self.access_token_signer = Some(signer);
        self
    }

    /// Current instant from the configured clock.
    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }
}

impl std::fmt::Debug for GrantServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantServices")
            .field("config", &self.config)
            .field("id_token_issuer", &self.id_token_issuer.is_some())
            .field("access_token_signer", &self.access_token_signer.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_allow_list_grants_everything_in_order() {
        let client = Client::new("app", "App");
        let granted = ClientScopePolicy
            .check_scopes_policy(&client, &scopes(&["openid", "profile", "openid", "email"]))
            .await
            .unwrap();
        assert_eq!(granted, scopes(&["openid", "profile", "email"]));
    }

    #[tokio::test]
    async fn test_allow_list_filters_requested_scopes() {
        let mut client = Client::new("app", "App");
        client.scopes = scopes(&["openid", "email"]);
        let granted = ClientScopePolicy
            .check_scopes_policy(&client, &scopes(&["email", "admin", "openid"]))
            .await
            .unwrap();
        assert_eq!(granted, scopes(&["email", "openid"]));
    }
}
