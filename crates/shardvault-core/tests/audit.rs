// crates/shardvault-core/tests/audit.rs
// ============================================================================
// Module: Audit Sink Tests
// Description: Tests for audit event shape and sink output.
// ============================================================================
//! ## Overview
//! Validates JSON-line output, severity mapping, and tenant redaction.

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

use shardvault_core::AuditKind;
use shardvault_core::AuditLevel;
use shardvault_core::AuditSink;
use shardvault_core::FileAuditSink;
use shardvault_core::MemoryAuditSink;
use shardvault_core::ShardId;
use shardvault_core::StorageAuditEvent;
use shardvault_core::TenantId;

#[test]
fn test_file_sink_appends_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let sink = FileAuditSink::new(&path).unwrap();
    let tenant = TenantId::new("550e8400-e29b-41d4-a716-446655440000");

    sink.record(&StorageAuditEvent::new(AuditKind::ShardDegraded).shard(ShardId::new(1)));
    sink.record(&StorageAuditEvent::new(AuditKind::DecryptFailed).tenant(&tenant));

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> =
        contents.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], "storage_audit");
    assert_eq!(lines[0]["kind"], "shard_degraded");
    assert_eq!(lines[0]["level"], "warn");
    assert_eq!(lines[0]["shard_id"], 1);
    assert_eq!(lines[1]["kind"], "decrypt_failed");
    assert_eq!(lines[1]["level"], "error");
    assert_eq!(lines[1]["tenant"], "550e8400...");
    assert!(!contents.contains("e29b-41d4"));
}

#[test]
fn test_memory_sink_preserves_arrival_order() {
    let sink = MemoryAuditSink::new();

    sink.record(&StorageAuditEvent::new(AuditKind::ShardRegisteredLive));
    sink.record(&StorageAuditEvent::new(AuditKind::TransactionRolledBack).message("boom"));
    sink.record(&StorageAuditEvent::new(AuditKind::PoolsClosed));

    assert_eq!(sink.kinds(), vec![
        AuditKind::ShardRegisteredLive,
        AuditKind::TransactionRolledBack,
        AuditKind::PoolsClosed,
    ]);
    assert_eq!(sink.events()[1].message.as_deref(), Some("boom"));
}

#[test]
fn test_integrity_kinds_are_errors() {
    assert_eq!(AuditKind::ShardMismatch.level(), AuditLevel::Error);
    assert_eq!(AuditKind::DecryptFailed.level(), AuditLevel::Error);
    assert_eq!(AuditKind::ShardAutoRegistered.level(), AuditLevel::Warn);
    assert_eq!(AuditKind::ShardRegisteredLive.level(), AuditLevel::Info);
}
