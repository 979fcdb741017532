use std::{env, fs};

use grantvault_core::config::loader::load_config;
use grantvault_core::config::{ConfigError, StorageStrategy};

#[test]
fn test_config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("grantvault.toml");

    let toml_content = r#"
issuer = "https://auth.example.com"

[storage]
strategy = "persistent"

[tokens]
authorization_code_lifetime = "5m"
access_token_lifetime = "15m"
refresh_token_lifetime = "30d"

[cache]
enabled = true

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses, unspecified values keep their defaults
    let cfg = load_config(Some(&path)).expect("should parse config");
    assert_eq!(cfg.issuer, "https://auth.example.com");
    assert_eq!(cfg.storage.strategy, StorageStrategy::Persistent);
    assert_eq!(cfg.tokens.authorization_code_secs(), 300);
    assert_eq!(cfg.tokens.access_token_secs(), 900);
    assert_eq!(cfg.tokens.refresh_token_secs(), 30 * 24 * 3600);
    assert_eq!(cfg.tokens.id_token_secs(), 3600);
    assert!(cfg.cache.enabled);
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("GRANTVAULT__TOKENS__ACCESS_TOKEN_LIFETIME", "2m");
    }
    let cfg_env = load_config(Some(&path)).expect("should parse config with env overrides");
    assert_eq!(cfg_env.tokens.access_token_secs(), 120);
    unsafe {
        env::remove_var("GRANTVAULT__TOKENS__ACCESS_TOKEN_LIFETIME");
    }

    // 3) Reuse window longer than the long-lived lifetime is rejected
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[tokens]
long_lived_access_token_lifetime = "12h"
long_lived_reuse_window = "24h"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(Some(&invalid_path)).expect_err("expected validation error");
    assert!(matches!(err, ConfigError::InvalidValue(_)));

    // 4) Unparseable duration is a load error
    let broken_path = dir.path().join("broken.toml");
    fs::write(&broken_path, "[tokens]\naccess_token_lifetime = \"soon\"\n").expect("write toml");
    let err = load_config(Some(&broken_path)).expect_err("expected load error");
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let cfg = load_config(Some(&dir.path().join("absent.toml"))).expect("defaults");
    assert_eq!(cfg.storage.strategy, StorageStrategy::InMemory);
    assert_eq!(cfg.tokens.authorization_code_secs(), 600);
}
