// crates/shardvault-config/tests/services.rs
// ============================================================================
// Module: Services Bootstrap Tests
// Description: Tests for wiring secrets, keys, routing, and pools from config.
// ============================================================================
//! ## Overview
//! Boots the storage layer from explicit collaborators without a database:
//! memory-backed shards, unreachable Postgres shards, and missing secrets.

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
use std::sync::Arc;

use shardvault_config::ConfigError;
use shardvault_config::ServicesError;
use shardvault_config::Services;
use shardvault_config::ShardVaultConfig;
use shardvault_config::StorageBackend;
use shardvault_core::AuditKind;
use shardvault_core::DatabaseCredentials;
use shardvault_core::EnvSecretProvider;
use shardvault_core::MasterKeyMode;
use shardvault_core::MemoryAuditSink;
use shardvault_core::SecretError;
use shardvault_core::ShardId;
use shardvault_core::StaticSecretProvider;
use shardvault_core::TenantId;
use shardvault_store::ShardState;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const MASTER_KEY: &str = "0123456789abcdef0123456789abcdef";

fn defaults() -> ShardVaultConfig {
    ShardVaultConfig::default()
}

fn memory_config(num_shards: u32) -> ShardVaultConfig {
    let mut config = defaults();
    config.router.num_shards = num_shards;
    config.storage.backend = StorageBackend::Memory;
    config
}

fn unreachable(database: &str) -> DatabaseCredentials {
    DatabaseCredentials {
        host: "127.0.0.1".to_string(),
        port: 1,
        database: database.to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
    }
}

// ============================================================================
// SECTION: Bootstrap
// ============================================================================

#[test]
fn test_memory_backend_registers_every_shard() {
    let audit = Arc::new(MemoryAuditSink::new());
    let secrets = StaticSecretProvider::new(MASTER_KEY);

    let services = Services::bootstrap(&memory_config(3), &secrets, audit.clone()).unwrap();

    let status = services.status().unwrap();
    assert_eq!(status.len(), 3);
    assert!(status.iter().all(|shard| shard.state == ShardState::Mock));
    assert_eq!(audit.kinds(), vec![AuditKind::ShardRegisteredMemory; 3]);
    assert!(services.is_degraded().unwrap());
    assert_eq!(services.router().num_shards(), 3);
}

#[test]
fn test_bootstrapped_repositories_share_shards() {
    let audit = Arc::new(MemoryAuditSink::new());
    let secrets = StaticSecretProvider::new(MASTER_KEY);
    let services = Services::bootstrap(&memory_config(2), &secrets, audit).unwrap();

    let patient = services.patients().create_patient("Arjun Gopal", "asthma").unwrap();
    let loaded = services.patients().get_patient(&patient.patient_id).unwrap().unwrap();
    let shard = services.router().shard_id(&patient.patient_id);

    assert_eq!(loaded.name, "Arjun Gopal");
    assert_eq!(loaded.shard_id, shard);
    let blob = services.keys().encrypt("x", &patient.patient_id).unwrap();
    assert_eq!(services.keys().decrypt(&blob, &patient.patient_id).unwrap(), "x");
}

#[test]
fn test_unreachable_postgres_shards_degrade() {
    let audit = Arc::new(MemoryAuditSink::new());
    let secrets = StaticSecretProvider::new(MASTER_KEY)
        .with_shard(ShardId::new(0), unreachable("aurahealth_shard0"))
        .with_shard(ShardId::new(1), unreachable("aurahealth_shard1"));
    let mut config = defaults();
    config.storage.min_connections = 1;
    config.storage.max_connections = 2;
    config.storage.connect_timeout_ms = 200;
    config.storage.acquire_timeout_ms = 300;

    let services = Services::bootstrap(&config, &secrets, audit.clone()).unwrap();

    let states: Vec<ShardState> =
        services.status().unwrap().into_iter().map(|shard| shard.state).collect();
    assert_eq!(states, vec![ShardState::Mock, ShardState::Mock]);
    assert_eq!(audit.kinds(), vec![AuditKind::ShardDegraded, AuditKind::ShardDegraded]);
    assert_eq!(services.shutdown().unwrap(), 0);
    let json = serde_json::to_value(services.status().unwrap()).unwrap();
    assert_eq!(json[1]["shard_id"], 1);
}

#[test]
fn test_missing_master_key_fails_bootstrap() {
    let secrets = EnvSecretProvider::from_lookup(|_| None);
    let audit = Arc::new(MemoryAuditSink::new());

    let result = Services::bootstrap(&memory_config(2), &secrets, audit);

    assert!(matches!(
        result,
        Err(ServicesError::Config(ConfigError::Secrets(SecretError::Missing(_))))
    ));
}

#[test]
fn test_missing_shard_credentials_fail_bootstrap() {
    let vars: BTreeMap<&str, &str> = BTreeMap::from([
        ("MASTER_ENCRYPTION_KEY", MASTER_KEY),
        ("DB_SHARD0_PORT", "not-a-port"),
    ]);
    let secrets =
        EnvSecretProvider::from_lookup(move |name| vars.get(name).map(ToString::to_string));
    let audit = Arc::new(MemoryAuditSink::new());

    let result = Services::bootstrap(&defaults(), &secrets, audit);

    assert!(matches!(
        result,
        Err(ServicesError::Config(ConfigError::Secrets(SecretError::Invalid(_))))
    ));
}

#[test]
fn test_short_master_key_is_normalized_and_audited() {
    let audit = Arc::new(MemoryAuditSink::new());
    let secrets = StaticSecretProvider::new("too-short");
    let mut config = memory_config(1);
    config.crypto.master_key_mode = MasterKeyMode::ZeroPad;

    let services = Services::bootstrap(&config, &secrets, audit.clone()).unwrap();

    let events = audit.events();
    assert_eq!(events[0].kind, AuditKind::MasterKeyNormalized);
    assert!(events[0].message.as_deref().unwrap_or_default().contains("zero-padded"));
    assert!(services.keys().normalization().is_lossy());
    let tenant = TenantId::new("tenant-a");
    let blob = services.keys().encrypt("note", &tenant).unwrap();
    assert_eq!(services.keys().decrypt(&blob, &tenant).unwrap(), "note");
}

#[test]
fn test_exact_mode_rejects_short_master_key() {
    let audit = Arc::new(MemoryAuditSink::new());
    let secrets = StaticSecretProvider::new("too-short");
    let mut config = memory_config(1);
    config.crypto.master_key_mode = MasterKeyMode::Exact;

    let result = Services::bootstrap(&config, &secrets, audit.clone());

    assert!(matches!(result, Err(ServicesError::Crypto(_))));
    assert!(audit.events().is_empty());
}
