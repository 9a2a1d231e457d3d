// crates/shardvault-core/tests/secrets.rs
// ============================================================================
// Module: Secret Provider Tests
// Description: Tests for environment and static secret providers.
// ============================================================================
//! ## Overview
//! Validates environment variable naming, defaults, and failure modes.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;

use shardvault_core::EnvSecretProvider;
use shardvault_core::SecretError;
use shardvault_core::SecretProvider;
use shardvault_core::ShardId;
use shardvault_core::StaticSecretProvider;
use shardvault_core::secrets::DEV_MASTER_KEY;

fn provider_with(vars: &[(&str, &str)]) -> EnvSecretProvider {
    let vars: BTreeMap<String, String> =
        vars.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect();
    EnvSecretProvider::from_lookup(move |key| vars.get(key).cloned())
}

// ============================================================================
// SECTION: Environment Provider
// ============================================================================

#[test]
fn test_env_master_key_is_required() {
    let provider = provider_with(&[]);
    assert!(matches!(provider.master_encryption_key(), Err(SecretError::Missing(_))));

    let blank = provider_with(&[("MASTER_ENCRYPTION_KEY", "   ")]);
    assert!(matches!(blank.master_encryption_key(), Err(SecretError::Missing(_))));
}

#[test]
fn test_env_master_key_is_returned_verbatim() {
    let provider = provider_with(&[("MASTER_ENCRYPTION_KEY", "prod-secret")]);
    assert_eq!(provider.master_encryption_key().unwrap(), "prod-secret");
}

#[test]
fn test_env_credentials_fall_back_to_local_defaults() {
    let provider = provider_with(&[]);

    let creds = provider.database_credentials(ShardId::new(1)).unwrap();

    assert_eq!(creds.host, "localhost");
    assert_eq!(creds.port, 5432);
    assert_eq!(creds.database, "aurahealth_shard1");
    assert_eq!(creds.username, "postgres");
    assert_eq!(creds.password, "postgres");
}

#[test]
fn test_env_credentials_read_shard_scoped_variables() {
    let provider = provider_with(&[
        ("DB_SHARD0_HOST", "db0.internal"),
        ("DB_SHARD0_PORT", "6432"),
        ("DB_SHARD0_DATABASE", "vault0"),
        ("DB_SHARD0_USER", "vault"),
        ("DB_SHARD0_PASSWORD", "hunter2"),
        ("DB_SHARD1_HOST", "db1.internal"),
    ]);

    let shard0 = provider.database_credentials(ShardId::new(0)).unwrap();
    let shard1 = provider.database_credentials(ShardId::new(1)).unwrap();

    assert_eq!(shard0.endpoint_label(), "vault0@db0.internal:6432");
    assert_eq!(shard0.username, "vault");
    assert_eq!(shard0.password, "hunter2");
    assert_eq!(shard1.endpoint_label(), "aurahealth_shard1@db1.internal:5432");
}

#[test]
fn test_env_invalid_port_is_rejected() {
    let provider = provider_with(&[("DB_SHARD0_PORT", "not-a-port")]);
    assert!(matches!(provider.database_credentials(ShardId::new(0)), Err(SecretError::Invalid(_))));
}

#[test]
fn test_credentials_debug_redacts_password() {
    let provider = provider_with(&[("DB_SHARD0_PASSWORD", "hunter2")]);
    let creds = provider.database_credentials(ShardId::new(0)).unwrap();

    let rendered = format!("{creds:?}");

    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("<redacted>"));
}

// ============================================================================
// SECTION: Static Provider
// ============================================================================

#[test]
fn test_development_provider_serves_two_local_shards() {
    let provider = StaticSecretProvider::development();

    assert_eq!(provider.master_encryption_key().unwrap(), DEV_MASTER_KEY);
    assert_eq!(provider.database_credentials(ShardId::new(0)).unwrap().port, 5432);
    assert_eq!(provider.database_credentials(ShardId::new(1)).unwrap().port, 5433);
    assert!(matches!(provider.database_credentials(ShardId::new(2)), Err(SecretError::Missing(_))));
}

#[test]
fn test_static_provider_debug_redacts_master_key() {
    let rendered = format!("{:?}", StaticSecretProvider::new("do-not-print"));
    assert!(!rendered.contains("do-not-print"));
}
