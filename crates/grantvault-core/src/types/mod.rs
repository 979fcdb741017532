//! Domain types shared by grants and their collaborators.
//!
//! - [`Client`] - OAuth 2.0 client registration as seen by the grant core
//! - [`User`] - resource owner resolved through the user directory

pub mod client;
pub mod user;

pub use client::Client;
pub use user::User;
