//! In-process storage collaborators for grantvault.
//!
//! This crate provides DashMap-backed implementations of the storage traits
//! from `grantvault-core`:
//!
//! - [`MemoryTokenRecordStorage`] - token records for the persistent strategy
//! - [`LocalGrantCache`] - TTL cache for authorization-code grant snapshots
//! - [`InMemoryUserDirectory`], [`InMemoryClientDirectory`] - rehydration
//!   lookups
//!
//! They are meant for development, tests and single-node deployments.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use grantvault_core::prelude::*;
//! use grantvault_memory::{InMemoryClientDirectory, InMemoryUserDirectory, MemoryTokenRecordStorage};
//!
//! let records = Arc::new(MemoryTokenRecordStorage::new());
//! let store = GrantStore::new(
//!     records,
//!     Arc::new(InMemoryUserDirectory::new()),
//!     Arc::new(InMemoryClientDirectory::new()),
//!     GrantServices::new(GrantConfig::default()),
//! );
//! ```

pub mod cache;
pub mod directory;
pub mod records;

pub use cache::{CacheStats, LocalGrantCache};
pub use directory::{InMemoryClientDirectory, InMemoryUserDirectory};
pub use records::MemoryTokenRecordStorage;
