// crates/shardvault-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for argument parsing and command helpers.
// Purpose: Ensure malformed operator input fails closed.
// Dependencies: shardvault-cli main helpers
// ============================================================================

//! ## Overview
//! Validates clap parsing, tenant routing output, base64 blob decoding, and
//! configuration resolution for the CLI entry point.

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

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;

use clap::Parser;
use shardvault_core::MasterKeyNormalization;

use super::Cli;
use super::Commands;
use super::ConfigCommand;
use super::decode_blob;
use super::key_manager;
use super::resolve_config;
use super::route_tenant;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn parses_route_with_override() {
    let cli = Cli::try_parse_from(["shardvault", "route", "tenant-a", "--num-shards", "4"]).unwrap();
    match cli.command {
        Commands::Route(command) => {
            assert_eq!(command.tenant, "tenant-a");
            assert_eq!(command.num_shards, Some(4));
            assert!(command.config.config.is_none());
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn parses_config_validate_path() {
    let cli =
        Cli::try_parse_from(["shardvault", "config", "validate", "--config", "vault.toml"]).unwrap();
    match cli.command {
        Commands::Config {
            command: ConfigCommand::Validate(args),
        } => assert_eq!(args.config.unwrap().to_string_lossy(), "vault.toml"),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn encrypt_requires_tenant_and_plaintext() {
    assert!(Cli::try_parse_from(["shardvault", "encrypt", "--tenant", "t"]).is_err());
    assert!(Cli::try_parse_from(["shardvault", "decrypt", "--blob", "AAAA"]).is_err());
}

#[test]
fn route_tenant_matches_router() {
    let output = route_tenant("abc", 7).unwrap();
    assert_eq!(output.shard_id.get(), 3_128_432_319 % 7);
    assert_eq!(output.num_shards, 7);
    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["shard_id"], 3_128_432_319_u64 % 7);
}

#[test]
fn route_tenant_rejects_zero_shards() {
    assert!(route_tenant("abc", 0).is_err());
}

#[test]
fn decode_blob_accepts_padded_base64() {
    assert_eq!(decode_blob(" AAEC \n").unwrap(), vec![0, 1, 2]);
}

#[test]
fn decode_blob_rejects_garbage() {
    let err = decode_blob("not base64!").unwrap_err();
    assert!(err.to_string().contains("base64"));
}

#[test]
fn resolve_config_reads_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shardvault.toml");
    fs::write(&path, "[router]\nnum_shards = 5\n").unwrap();
    assert_eq!(resolve_config(Some(&path)).unwrap().router.num_shards, 5);
}

#[test]
fn resolve_config_rejects_missing_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolve_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(err.to_string().contains("failed to load config"));
}

#[test]
fn key_manager_audits_master_key_normalization() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.log");
    let path = dir.path().join("shardvault.toml");
    let config = format!(
        "[secrets]\nsource = \"static_dev\"\n\n[audit]\nsink = \"file\"\npath = {:?}\n",
        audit_path.to_string_lossy()
    );
    fs::write(&path, config).unwrap();

    let keys = key_manager(Some(&path)).unwrap();

    assert_ne!(keys.normalization(), MasterKeyNormalization::Verbatim);
    let log = fs::read_to_string(&audit_path).unwrap();
    assert!(log.contains("\"master_key_normalized\""));
}
