//! Grant lifecycle configuration.
//!
//! Supplies default token lifetimes, the storage strategy chosen by the
//! composition root, the long-lived access token reuse window, and the
//! authorization-code cache switch.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root grant lifecycle configuration.
///
/// # Example (TOML)
///
/// ```toml
/// issuer = "https://auth.example.com"
///
/// [storage]
/// strategy = "persistent"
///
/// [tokens]
/// access_token_lifetime = "15m"
/// refresh_token_lifetime = "30d"
///
/// [cache]
/// enabled = true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GrantConfig {
    /// Issuer identifier (used in the ID token `iss` claim).
    pub issuer: String,

    /// Storage strategy for newly created grants.
    pub storage: StorageConfig,

    /// Default token lifetimes.
    pub tokens: TokenConfig,

    /// Authorization-code snapshot cache.
    pub cache: CacheConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            storage: StorageConfig::default(),
            tokens: TokenConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where grants keep their tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStrategy {
    /// Tokens live in the process; the in-memory index owns grants.
    #[default]
    InMemory,
    /// Every mint writes through to the token record store.
    Persistent,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Selected storage strategy.
    pub strategy: StorageStrategy,
}

/// Token lifetime configuration.
///
/// Clients may override the access and refresh token lifetimes with a
/// positive per-client value.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Default access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Default refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Lifetime of the long-lived access token.
    #[serde(with = "humantime_serde")]
    pub long_lived_access_token_lifetime: Duration,

    /// Age after which the long-lived access token is replaced instead of
    /// reused.
    #[serde(with = "humantime_serde")]
    pub long_lived_reuse_window: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(600), // 10 minutes
            access_token_lifetime: Duration::from_secs(3600),      // 1 hour
            refresh_token_lifetime: Duration::from_secs(90 * 24 * 3600), // 90 days
            id_token_lifetime: Duration::from_secs(3600),
            long_lived_access_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            long_lived_reuse_window: Duration::from_secs(24 * 3600),
        }
    }
}

impl TokenConfig {
    /// Authorization code lifetime in seconds.
    #[must_use]
    pub fn authorization_code_secs(&self) -> i64 {
        as_secs(self.authorization_code_lifetime)
    }

    /// Default access token lifetime in seconds.
    #[must_use]
    pub fn access_token_secs(&self) -> i64 {
        as_secs(self.access_token_lifetime)
    }

    /// Default refresh token lifetime in seconds.
    #[must_use]
    pub fn refresh_token_secs(&self) -> i64 {
        as_secs(self.refresh_token_lifetime)
    }

    /// ID token lifetime in seconds.
    #[must_use]
    pub fn id_token_secs(&self) -> i64 {
        as_secs(self.id_token_lifetime)
    }

    /// Long-lived access token lifetime in seconds.
    #[must_use]
    pub fn long_lived_access_token_secs(&self) -> i64 {
        as_secs(self.long_lived_access_token_lifetime)
    }

    /// Reuse window as a `time::Duration`.
    #[must_use]
    pub fn long_lived_reuse_window(&self) -> time::Duration {
        time::Duration::seconds(as_secs(self.long_lived_reuse_window))
    }
}

fn as_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Authorization-code snapshot cache configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep authorization-code grants in the distributed cache only.
    /// Lookups by authorization code consult the cache before the registry.
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl GrantConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the issuer is empty, and
    /// `ConfigError::InvalidValue` if:
    /// - Any token lifetime is zero
    /// - The long-lived reuse window exceeds the long-lived token lifetime
    /// - The log level is unknown
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }

        let lifetimes = [
            (
                "authorization_code_lifetime",
                self.tokens.authorization_code_lifetime,
            ),
            ("access_token_lifetime", self.tokens.access_token_lifetime),
            ("refresh_token_lifetime", self.tokens.refresh_token_lifetime),
            ("id_token_lifetime", self.tokens.id_token_lifetime),
            (
                "long_lived_access_token_lifetime",
                self.tokens.long_lived_access_token_lifetime,
            ),
            ("long_lived_reuse_window", self.tokens.long_lived_reuse_window),
        ];
        for (name, value) in lifetimes {
            if value.as_secs() == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "tokens.{name} must be at least one second"
                )));
            }
        }

        if self.tokens.long_lived_reuse_window > self.tokens.long_lived_access_token_lifetime {
            return Err(ConfigError::InvalidValue(
                "tokens.long_lived_reuse_window must be <= long_lived_access_token_lifetime"
                    .to_string(),
            ));
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid log level: '{other}'"
                )));
            }
        }

        Ok(())
    }
}

pub mod loader {
    //! Layered configuration loading: optional TOML file, then
    //! `GRANTVAULT__SECTION__KEY` environment overrides.

    use super::{ConfigError, GrantConfig};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "grantvault.toml";

    /// Loads and validates configuration.
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be parsed, or the
    /// validation error if the merged configuration is invalid.
    pub fn load_config(path: Option<&Path>) -> Result<GrantConfig, ConfigError> {
        let mut builder = Config::builder();
        let file = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        // Environment variable overrides, e.g. GRANTVAULT__TOKENS__ACCESS_TOKEN_LIFETIME=15m
        builder = builder.add_source(
            Environment::with_prefix("GRANTVAULT")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: GrantConfig = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GrantConfig::default();
        assert_eq!(config.storage.strategy, StorageStrategy::InMemory);
        assert_eq!(config.tokens.authorization_code_secs(), 600);
        assert_eq!(config.tokens.access_token_secs(), 3600);
        assert_eq!(config.tokens.refresh_token_secs(), 90 * 24 * 3600);
        assert_eq!(
            config.tokens.long_lived_reuse_window(),
            time::Duration::hours(24)
        );
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(GrantConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_issuer_fails_validation() {
        let mut config = GrantConfig::default();
        config.issuer = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_zero_lifetime_fails_validation() {
        let mut config = GrantConfig::default();
        config.tokens.access_token_lifetime = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("access_token_lifetime"));
    }

    #[test]
    fn test_reuse_window_longer_than_lifetime_fails() {
        let mut config = GrantConfig::default();
        config.tokens.long_lived_access_token_lifetime = Duration::from_secs(3600);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("long_lived_reuse_window"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = GrantConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_deserialize_humantime_and_strategy() {
        let toml = r#"
            issuer = "https://auth.example.com"

            [storage]
            strategy = "persistent"

            [tokens]
            access_token_lifetime = "15m"
            refresh_token_lifetime = "30d"
        "#;
        let config: GrantConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.issuer, "https://auth.example.com");
        assert_eq!(config.storage.strategy, StorageStrategy::Persistent);
        assert_eq!(config.tokens.access_token_secs(), 900);
        assert_eq!(config.tokens.refresh_token_secs(), 30 * 24 * 3600);
        // untouched fields keep their defaults
        assert_eq!(config.tokens.authorization_code_secs(), 600);
    }
}
