//! Issued credentials.
//!
//! A [`Token`] is one credential owned by a grant: an authorization code,
//! an access token, a refresh token, or an ID token. Its dates are fixed at
//! construction; its `revoked`, `expired` and `used` flags only ever move
//! from `false` to `true`.
//!
//! ```text
//! minted -> (used, codes only) -> (expired | revoked) -> terminal-invalid
//! ```

pub mod hash;
pub mod jwt;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{GrantError, GrantResult};

pub use hash::{
    HandleGenerator, RandomHandleGenerator, Sha256TokenHasher, TokenHasher, cert_thumbprint_s256,
};

/// Kind of credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Single-use authorization code.
    AuthorizationCode,
    /// Bearer (or certificate-bound) access token.
    AccessToken,
    /// Refresh token, rotated on every mint.
    RefreshToken,
    /// OpenID Connect ID token (compact JWT).
    IdToken,
}

impl TokenKind {
    /// All kinds, in index order.
    pub const ALL: [TokenKind; 4] = [
        Self::AuthorizationCode,
        Self::AccessToken,
        Self::RefreshToken,
        Self::IdToken,
    ];

    /// Returns the persisted token type name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = GrantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "access_token" => Ok(Self::AccessToken),
            "refresh_token" => Ok(Self::RefreshToken),
            "id_token" => Ok(Self::IdToken),
            other => Err(GrantError::invalid_token(format!(
                "unknown token type '{other}'"
            ))),
        }
    }
}

/// One issued credential.
///
/// Shared as `Arc<Token>`; the flags are atomics so concurrent readers and
/// revokers need no lock.
#[derive(Debug)]
pub struct Token {
    kind: TokenKind,
    code: String,
    storage_key: String,
    created_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    reference_id: String,
    auth_context_ref: Option<String>,
    session_ref: Option<String>,
    confirmation_hash: Option<String>,
    revoked: AtomicBool,
    expired: AtomicBool,
    used: AtomicBool,
}

impl Token {
    /// Creates a freshly minted token.
    ///
    /// # Arguments
    ///
    /// * `kind` - Credential kind
    /// * `code` - Raw code handed to the client
    /// * `storage_key` - One-way hash of `code`
    /// * `lifetime_secs` - Lifetime in seconds, must be positive
    /// * `now` - Mint instant, becomes `created_at`
    ///
    /// # Errors
    ///
    /// Returns `GrantError::InvalidLifetime` if `lifetime_secs <= 0`.
    pub fn new(
        kind: TokenKind,
        code: impl Into<String>,
        storage_key: impl Into<String>,
        lifetime_secs: i64,
        now: OffsetDateTime,
    ) -> GrantResult<Self> {
        if lifetime_secs <= 0 {
            return Err(GrantError::invalid_lifetime(lifetime_secs));
        }
        let expires_at = now
            .checked_add(Duration::seconds(lifetime_secs))
            .ok_or_else(|| GrantError::invalid_lifetime(lifetime_secs))?;
        Ok(Self::restore(kind, code, storage_key, now, expires_at))
    }

    /// Rebuilds a token from stored dates.
    ///
    /// No lifetime precondition applies: the dates were fixed when the
    /// token was minted and may already lie in the past.
    #[must_use]
    pub fn restore(
        kind: TokenKind,
        code: impl Into<String>,
        storage_key: impl Into<String>,
        created_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            storage_key: storage_key.into(),
            created_at,
            expires_at,
            reference_id: Uuid::new_v4().to_string(),
            auth_context_ref: None,
            session_ref: None,
            confirmation_hash: None,
            revoked: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            used: AtomicBool::new(false),
        }
    }

    /// Sets the authentication context reference (ACR values).
    #[must_use]
    pub fn with_auth_context_ref(mut self, value: Option<String>) -> Self {
        self.auth_context_ref = value;
        self
    }

    /// Sets the session reference.
    #[must_use]
    pub fn with_session_ref(mut self, value: Option<String>) -> Self {
        self.session_ref = value;
        self
    }

    /// Binds the token to a client certificate thumbprint.
    #[must_use]
    pub fn with_confirmation_hash(mut self, value: Option<String>) -> Self {
        self.confirmation_hash = value;
        self
    }

    /// Replaces the handle with a self-contained code (a signed JWT) and
    /// its storage key.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>, storage_key: impl Into<String>) -> Self {
        self.code = code.into();
        self.storage_key = storage_key.into();
        self
    }

    /// Overrides the generated reference id.
    #[must_use]
    pub fn with_reference_id(mut self, value: impl Into<String>) -> Self {
        self.reference_id = value.into();
        self
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Raw code. For tokens rehydrated from storage this is the storage key,
    /// unless the caller presented the raw code.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// Unique per-token identifier (`jti`).
    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    pub fn auth_context_ref(&self) -> Option<&str> {
        self.auth_context_ref.as_deref()
    }

    pub fn session_ref(&self) -> Option<&str> {
        self.session_ref.as_deref()
    }

    /// `x5t#S256` thumbprint for certificate-bound access tokens.
    pub fn confirmation_hash(&self) -> Option<&str> {
        self.confirmation_hash.as_deref()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    /// Marks the token expired if `now` is strictly past `expires_at`.
    ///
    /// Idempotent; an earlier `now` never clears the flag. Returns the
    /// flag after the check.
    pub fn check_expired(&self, now: OffsetDateTime) -> bool {
        if now > self.expires_at {
            self.expired.store(true, Ordering::Release);
        }
        self.is_expired()
    }

    /// Seconds until expiry, floored at zero. Does not touch the flags.
    #[must_use]
    pub fn remaining_seconds(&self, now: OffsetDateTime) -> i64 {
        (self.expires_at - now).whole_seconds().max(0)
    }

    /// Time since the token was minted.
    #[must_use]
    pub fn age(&self, now: OffsetDateTime) -> Duration {
        now - self.created_at
    }

    /// Validity from the flags alone: not revoked, not expired, and for
    /// authorization codes not used.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.is_revoked() || self.is_expired() {
            return false;
        }
        !(self.kind == TokenKind::AuthorizationCode && self.is_used())
    }

    /// Runs the expiry check at `now`, then reports validity.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.check_expired(now);
        self.is_valid()
    }

    /// Revokes the token.
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    /// Marks the token used. Returns `true` only for the call that made
    /// the transition.
    pub fn mark_used(&self) -> bool {
        self.used
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Clone for Token {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            code: self.code.clone(),
            storage_key: self.storage_key.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            reference_id: self.reference_id.clone(),
            auth_context_ref: self.auth_context_ref.clone(),
            session_ref: self.session_ref.clone(),
            confirmation_hash: self.confirmation_hash.clone(),
            revoked: AtomicBool::new(self.is_revoked()),
            expired: AtomicBool::new(self.is_expired()),
            used: AtomicBool::new(self.is_used()),
        }
    }
}

/// Serialized form of a token.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRepr {
    kind: TokenKind,
    code: String,
    storage_key: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
    reference_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_context_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confirmation_hash: Option<String>,
    #[serde(default)]
    revoked: bool,
    #[serde(default)]
    expired: bool,
    #[serde(default)]
    used: bool,
}

impl Serialize for Token {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TokenRepr {
            kind: self.kind,
            code: self.code.clone(),
            storage_key: self.storage_key.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            reference_id: self.reference_id.clone(),
            auth_context_ref: self.auth_context_ref.clone(),
            session_ref: self.session_ref.clone(),
            confirmation_hash: self.confirmation_hash.clone(),
            revoked: self.is_revoked(),
            expired: self.is_expired(),
            used: self.is_used(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TokenRepr::deserialize(deserializer)?;
        Ok(Self {
            kind: repr.kind,
            code: repr.code,
            storage_key: repr.storage_key,
            created_at: repr.created_at,
            expires_at: repr.expires_at,
            reference_id: repr.reference_id,
            auth_context_ref: repr.auth_context_ref,
            session_ref: repr.session_ref,
            confirmation_hash: repr.confirmation_hash,
            revoked: AtomicBool::new(repr.revoked),
            expired: AtomicBool::new(repr.expired),
            used: AtomicBool::new(repr.used),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint(kind: TokenKind, lifetime: i64, now: OffsetDateTime) -> Token {
        Token::new(kind, "raw-code", "hashed-code", lifetime, now).unwrap()
    }

    #[test]
    fn test_non_positive_lifetime_is_rejected() {
        let now = OffsetDateTime::now_utc();
        for lifetime in [0, -1, -3600] {
            let err = Token::new(TokenKind::AccessToken, "c", "k", lifetime, now).unwrap_err();
            assert!(matches!(err, GrantError::InvalidLifetime { seconds } if seconds == lifetime));
        }
    }

    #[test]
    fn test_expires_at_is_created_plus_lifetime() {
        let now = OffsetDateTime::now_utc();
        let token = mint(TokenKind::AccessToken, 3600, now);
        assert_eq!(token.created_at(), now);
        assert_eq!(token.expires_at(), now + Duration::seconds(3600));
        assert!(token.is_valid());
    }

    #[test]
    fn test_check_expired_boundaries_and_monotonicity() {
        let t = OffsetDateTime::now_utc();
        let lifetime = 60;
        let token = mint(TokenKind::AccessToken, lifetime, t);

        assert!(!token.check_expired(t + Duration::seconds(lifetime - 1)));
        assert!(token.is_valid());

        // exactly at expires_at is not yet expired
        assert!(!token.check_expired(t + Duration::seconds(lifetime)));

        assert!(token.check_expired(t + Duration::seconds(lifetime + 1)));
        assert!(!token.is_valid());

        // an earlier instant never resets the flag
        assert!(token.check_expired(t));
        assert!(token.is_expired());
    }

    #[test]
    fn test_remaining_seconds_is_floored_and_pure() {
        let t = OffsetDateTime::now_utc();
        let token = mint(TokenKind::RefreshToken, 100, t);

        assert_eq!(token.remaining_seconds(t), 100);
        assert_eq!(token.remaining_seconds(t + Duration::seconds(40)), 60);
        assert_eq!(token.remaining_seconds(t + Duration::seconds(500)), 0);
        // computing remaining time does not mark the token expired
        assert!(!token.is_expired());
    }

    #[test]
    fn test_used_code_is_invalid() {
        let t = OffsetDateTime::now_utc();
        let code = mint(TokenKind::AuthorizationCode, 600, t);
        assert!(code.mark_used());
        assert!(!code.mark_used());
        assert!(!code.is_valid());
        assert!(!code.is_revoked());
        assert!(!code.is_expired());
    }

    #[test]
    fn test_used_flag_ignored_for_other_kinds() {
        let t = OffsetDateTime::now_utc();
        let token = mint(TokenKind::AccessToken, 600, t);
        token.mark_used();
        assert!(token.is_valid());
    }

    #[test]
    fn test_revoke_is_one_way() {
        let token = mint(TokenKind::RefreshToken, 600, OffsetDateTime::now_utc());
        token.revoke();
        token.revoke();
        assert!(token.is_revoked());
        assert!(!token.is_valid());
    }

    #[test]
    fn test_serde_keeps_flags_and_dates() {
        let t = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();
        let token = mint(TokenKind::AuthorizationCode, 600, t)
            .with_session_ref(Some("session-1".to_string()));
        token.mark_used();

        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("\"kind\":\"authorization_code\""));
        assert!(json.contains("sessionRef"));

        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code(), "raw-code");
        assert_eq!(back.created_at(), t);
        assert!(back.is_used());
        assert_eq!(back.session_ref(), Some("session-1"));
    }

    #[test]
    fn test_token_kind_parse() {
        for kind in TokenKind::ALL {
            assert_eq!(kind.as_str().parse::<TokenKind>().unwrap(), kind);
        }
        assert!("bearer".parse::<TokenKind>().is_err());
    }
}
