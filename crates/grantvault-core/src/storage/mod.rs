//! Storage traits for grant and token data.
//!
//! This module defines the collaborator interfaces the grant core consumes:
//!
//! - Token records for the persistent strategy
//! - Authorization-code grant snapshots in a distributed cache
//! - User and client directories used when rehydrating grants
//!
//! # Implementations
//!
//! In-process implementations are provided in a separate crate:
//!
//! - `grantvault-memory` - DashMap-backed record store, TTL cache and
//!   directories

pub mod cache;
pub mod directory;
pub mod token_record;

pub use cache::GrantCache;
pub use directory::{ClientDirectory, UserDirectory};
pub use token_record::{TokenRecord, TokenRecordStorage};
