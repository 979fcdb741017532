//! Grant and token lifecycle error types.
//!
//! Lookup misses are never errors: resolve operations return `Ok(None)`.
//! The variants here cover precondition violations, storage and
//! collaborator failures, and attempts to mutate a read-only grant view.

use std::fmt;

/// Grant and token lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// A token was requested with a non-positive lifetime.
    #[error("Invalid token lifetime: {seconds}s (must be greater than zero)")]
    InvalidLifetime {
        /// The rejected lifetime in seconds.
        seconds: i64,
    },

    /// The authorization grant is invalid, consumed, or revoked.
    #[error("Invalid grant: {message}")]
    InvalidGrant { message: String },

    /// The presented token is invalid or malformed.
    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    /// The requested scope was rejected by the scope policy.
    #[error("Invalid scope: {message}")]
    InvalidScope { message: String },

    /// The operation is not supported on this grant or backend.
    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation {
        /// Name of the rejected operation.
        operation: String,
    },

    /// An error occurred while storing or retrieving token records.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// An error occurred in the distributed cache collaborator.
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// The ID token could not be signed or encrypted.
    #[error("Token issuance error: {message}")]
    Issuance { message: String },

    /// The grant configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type for grant and token lifecycle operations.
pub type GrantResult<T> = Result<T, GrantError>;

/// Constructors take anything convertible into the message.
impl GrantError {
    #[must_use]
    pub fn invalid_lifetime(seconds: i64) -> Self {
        Self::InvalidLifetime { seconds }
    }

    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn issuance(message: impl Into<String>) -> Self {
        Self::Issuance {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error was caused by the caller's input.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidLifetime { .. }
                | Self::InvalidGrant { .. }
                | Self::InvalidToken { .. }
                | Self::InvalidScope { .. }
                | Self::UnsupportedOperation { .. }
        )
    }

    /// Returns `true` if this error is a server-side failure.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the OAuth 2.0 error code for this error, when one applies.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidToken { .. } => "invalid_token",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidLifetime { .. } | Self::UnsupportedOperation { .. } => "invalid_request",
            Self::Storage { .. }
            | Self::Cache { .. }
            | Self::Issuance { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidLifetime { .. } | Self::UnsupportedOperation { .. } => {
                ErrorCategory::Precondition
            }
            Self::InvalidGrant { .. } | Self::InvalidToken { .. } | Self::InvalidScope { .. } => {
                ErrorCategory::Authorization
            }
            Self::Storage { .. } | Self::Cache { .. } => ErrorCategory::Storage,
            Self::Issuance { .. } => ErrorCategory::Issuance,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Error categories for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Violated operation precondition.
    Precondition,
    /// Authorization and token validity errors.
    Authorization,
    /// Record store or cache errors.
    Storage,
    /// ID token signing errors.
    Issuance,
    Configuration,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::Authorization => "authorization",
            Self::Storage => "storage",
            Self::Issuance => "issuance",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GrantError::invalid_lifetime(0);
        assert_eq!(
            err.to_string(),
            "Invalid token lifetime: 0s (must be greater than zero)"
        );

        let err = GrantError::unsupported("mint_access_token");
        assert_eq!(err.to_string(), "Unsupported operation: mint_access_token");

        let err = GrantError::storage("connection reset");
        assert_eq!(err.to_string(), "Storage error: connection reset");
    }

    #[test]
    fn test_client_vs_server_errors() {
        assert!(GrantError::invalid_lifetime(-5).is_client_error());
        assert!(GrantError::invalid_grant("reused").is_client_error());
        assert!(GrantError::unsupported("save").is_client_error());

        assert!(GrantError::storage("down").is_server_error());
        assert!(GrantError::cache("down").is_server_error());
        assert!(GrantError::issuance("no key").is_server_error());
    }

    #[test]
    fn test_oauth_error_codes() {
        assert_eq!(
            GrantError::invalid_grant("x").oauth_error_code(),
            "invalid_grant"
        );
        assert_eq!(
            GrantError::invalid_token("x").oauth_error_code(),
            "invalid_token"
        );
        assert_eq!(GrantError::storage("x").oauth_error_code(), "server_error");
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            GrantError::invalid_lifetime(0).category(),
            ErrorCategory::Precondition
        );
        assert_eq!(
            GrantError::invalid_scope("x").category(),
            ErrorCategory::Authorization
        );
        assert_eq!(GrantError::cache("x").category(), ErrorCategory::Storage);
        assert_eq!(ErrorCategory::Issuance.to_string(), "issuance");
    }
}
