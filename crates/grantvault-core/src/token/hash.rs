//! Token handle generation and one-way hashing.
//!
//! # Security
//!
//! - Raw codes are handed to the client exactly once and never stored
//! - Every registry and record addresses a token by its hash (storage key)
//! - Lookups hash the presented code first, so a leaked storage key cannot
//!   be replayed as a code

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Produces opaque, high-entropy token handles.
pub trait HandleGenerator: Send + Sync {
    /// Generates a new handle.
    fn generate(&self) -> String;
}

/// One-way hashing of token codes into storage keys.
pub trait TokenHasher: Send + Sync {
    /// Hashes a raw code into its storage key.
    fn hash(&self, raw: &str) -> String;
}

/// 256-bit random handles encoded as base64url (43 characters).
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomHandleGenerator;

impl HandleGenerator for RandomHandleGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Hex-encoded SHA-256 hashing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256TokenHasher;

impl TokenHasher for Sha256TokenHasher {
    fn hash(&self, raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Computes the `x5t#S256` confirmation thumbprint of a DER-encoded
/// client certificate (RFC 8705).
#[must_use]
pub fn cert_thumbprint_s256(der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(der))
}
