//! # grantvault-core
//!
//! Token and grant lifecycle core for OAuth 2.0 / OpenID Connect
//! authorization servers.
//!
//! This crate provides:
//! - Token model with single-direction validity flags
//! - Grant aggregate minting authorization codes, access, long-lived
//!   access, refresh and ID tokens
//! - Enum-driven grant construction on a configured backend
//! - In-memory and persistence-backed registries resolving grants by code
//! - Cache snapshots for resuming authorization-code grants on another node
//!
//! ## Overview
//!
//! A [`Grant`] owns every token issued for one authorization transaction.
//! Mints return the new token together with [`IndexEvent`]s; a
//! [`GrantRegistry`] ([`GrantIndex`] or [`GrantStore`]) applies them so the
//! token becomes resolvable. [`GrantService`] wires these together for
//! request handlers.
//!
//! Raw token codes never leave the grant: registries and records address
//! tokens by a one-way storage key computed by the [`TokenHasher`].
//!
//! ## Modules
//!
//! - [`config`] - Lifetimes, storage strategy and cache configuration
//! - [`token`] - Token model, hashing, handle generation and JWT signing
//! - [`grant`] - Grant aggregate and read-only view
//! - [`factory`] - Grant construction per grant kind
//! - [`index`] - In-memory registry
//! - [`metrics`] - Token issuance counters
//! - [`store`] - Persistent registry
//! - [`snapshot`] - Cache snapshots of authorization-code grants
//! - [`service`] - Facade for request handlers
//! - [`storage`] - Collaborator traits for records, cache and directories

pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
pub mod grant;
pub mod index;
pub mod metrics;
pub mod registry;
pub mod service;
pub mod services;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod token;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GrantConfig, StorageStrategy};
pub use error::{ErrorCategory, GrantError, GrantResult};
pub use factory::GrantFactory;
pub use grant::{Grant, GrantBackend, GrantKind, GrantMetadata, IndexEvent, Minted, ReadOnlyGrant};
pub use index::GrantIndex;
pub use registry::GrantRegistry;
pub use service::{GrantService, GrantServiceBuilder};
pub use services::{
    AccessTokenRequest, AccessTokenSigner, ClientScopePolicy, GrantServices, IdTokenIssuer,
    IdTokenRequest, ScopePolicy,
};
pub use snapshot::CacheSnapshot;
pub use storage::{ClientDirectory, GrantCache, TokenRecord, TokenRecordStorage, UserDirectory};
pub use store::GrantStore;
pub use token::{Token, TokenHasher, TokenKind};
pub use types::{Client, User};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use grantvault_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{GrantConfig, StorageStrategy};
    pub use crate::error::{GrantError, GrantResult};
    pub use crate::factory::GrantFactory;
    pub use crate::grant::{Grant, GrantBackend, GrantKind, IndexEvent, Minted, ReadOnlyGrant};
    pub use crate::index::GrantIndex;
    pub use crate::registry::GrantRegistry;
    pub use crate::service::GrantService;
    pub use crate::services::GrantServices;
    pub use crate::storage::{
        ClientDirectory, GrantCache, TokenRecord, TokenRecordStorage, UserDirectory,
    };
    pub use crate::store::GrantStore;
    pub use crate::token::{Token, TokenKind};
    pub use crate::types::{Client, User};
}
