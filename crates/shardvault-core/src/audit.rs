// crates/shardvault-core/src/audit.rs
// ============================================================================
// Module: ShardVault Audit Logging
// Description: Structured audit events for shard lifecycle and integrity checks.
// Purpose: Emit redacted JSON-line audit logs without a logging framework.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every degradation, rollback, and integrity failure in the data-access layer
//! is reported as a [`StorageAuditEvent`] through an [`AuditSink`]. Sinks are
//! intentionally small so deployments can route events to their own pipeline.
//!
//! Security posture: events carry redacted tenant ids and never carry key
//! material, credentials, or plaintext.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::identifiers::ShardId;
use crate::identifiers::TenantId;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Normal lifecycle event.
    Info,
    /// Degraded but recovered condition.
    Warn,
    /// Integrity failure surfaced to the caller.
    Error,
}

/// Audit event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Shard connected to its backing store.
    ShardRegisteredLive,
    /// Shard explicitly registered against the in-memory store.
    ShardRegisteredMemory,
    /// Shard could not reach its backing store and fell back to memory.
    ShardDegraded,
    /// Unregistered shard was registered in memory on first use.
    ShardAutoRegistered,
    /// Scoped session rolled back after an error.
    TransactionRolledBack,
    /// Live pools were released.
    PoolsClosed,
    /// Stored shard id disagreed with routing.
    ShardMismatch,
    /// Authenticated decryption failed.
    DecryptFailed,
    /// Master key secret was normalized to 32 bytes.
    MasterKeyNormalized,
}

impl AuditKind {
    /// Returns the default severity for this kind.
    #[must_use]
    pub const fn level(self) -> AuditLevel {
        match self {
            Self::ShardRegisteredLive
            | Self::ShardRegisteredMemory
            | Self::PoolsClosed
            | Self::MasterKeyNormalized => AuditLevel::Info,
            Self::ShardDegraded | Self::ShardAutoRegistered | Self::TransactionRolledBack => {
                AuditLevel::Warn
            }
            Self::ShardMismatch | Self::DecryptFailed => AuditLevel::Error,
        }
    }
}

/// Storage audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct StorageAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Event classification.
    pub kind: AuditKind,
    /// Event severity.
    pub level: AuditLevel,
    /// Shard the event concerns, when any.
    pub shard_id: Option<ShardId>,
    /// Redacted tenant id, when any.
    pub tenant: Option<String>,
    /// Free-form detail (never secrets or plaintext).
    pub message: Option<String>,
}

impl StorageAuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(kind: AuditKind) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: "storage_audit",
            timestamp_ms,
            kind,
            level: kind.level(),
            shard_id: None,
            tenant: None,
            message: None,
        }
    }

    /// Attaches the shard the event concerns.
    #[must_use]
    pub fn shard(mut self, shard_id: ShardId) -> Self {
        self.shard_id = Some(shard_id);
        self
    }

    /// Attaches a redacted tenant id.
    #[must_use]
    pub fn tenant(mut self, tenant_id: &TenantId) -> Self {
        self.tenant = Some(tenant_id.redacted());
        self
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for storage events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &StorageAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &StorageAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &StorageAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &StorageAuditEvent) {}
}

/// Audit sink that keeps events in memory for inspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<StorageAuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<StorageAuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the kinds of recorded events in arrival order.
    #[must_use]
    pub fn kinds(&self) -> Vec<AuditKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &StorageAuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
