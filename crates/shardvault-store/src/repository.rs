// crates/shardvault-store/src/repository.rs
// ============================================================================
// Module: ShardVault Repository Support
// Description: Shared error type and row decoding for shard repositories.
// Purpose: Keep recoverable and integrity failures distinct for callers.
// Dependencies: shardvault-core, thiserror
// ============================================================================

//! ## Overview
//! [`RepositoryError`] folds pool, session, crypto, and routing failures into
//! one type while preserving their categories: [`RepositoryError::is_retryable`]
//! marks pool exhaustion, [`RepositoryError::is_integrity_failure`] marks tag
//! failures, malformed blobs, and shard mismatches, which callers must never
//! retry or suppress.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use shardvault_core::AuditKind;
use shardvault_core::AuditSink;
use shardvault_core::CryptoError;
use shardvault_core::RoutingError;
use shardvault_core::ShardId;
use shardvault_core::ShardRouter;
use shardvault_core::StorageAuditEvent;
use shardvault_core::TenantId;
use thiserror::Error;

use crate::manager::PoolError;
use crate::schema::Row;
use crate::schema::Value;
use crate::session::SessionError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Connection acquisition or transaction control failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Statement failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Encryption or decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Stored shard assignment disagrees with routing.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// Referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Request arguments are unusable.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Stored row does not decode.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    /// Returns whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Pool(err) if err.is_retryable())
    }

    /// Returns whether the error is a data integrity violation.
    #[must_use]
    pub const fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::Crypto(CryptoError::Integrity(_) | CryptoError::Format(_))
                | Self::Routing(RoutingError::ShardMismatch { .. })
        )
    }
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Returns a required text cell.
pub(crate) fn text(row: &Row, column: &str) -> Result<String, RepositoryError> {
    row.get(column)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RepositoryError::Corrupt(format!("{column} is not text")))
}

/// Returns a required integer cell.
pub(crate) fn integer(row: &Row, column: &str) -> Result<i64, RepositoryError> {
    row.get(column)
        .and_then(Value::as_i64)
        .ok_or_else(|| RepositoryError::Corrupt(format!("{column} is not an integer")))
}

/// Returns a nullable text cell.
pub(crate) fn optional_text(row: &Row, column: &str) -> Result<Option<String>, RepositoryError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(value)) => Ok(Some(value.clone())),
        Some(_) => Err(RepositoryError::Corrupt(format!("{column} is not text"))),
    }
}

/// Returns a nullable integer cell.
pub(crate) fn optional_integer(row: &Row, column: &str) -> Result<Option<i64>, RepositoryError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(value)) => Ok(Some(*value)),
        Some(_) => Err(RepositoryError::Corrupt(format!("{column} is not an integer"))),
    }
}

/// Returns a required byte cell.
pub(crate) fn bytes(row: &Row, column: &str) -> Result<Vec<u8>, RepositoryError> {
    row.get(column)
        .and_then(Value::as_bytes)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| RepositoryError::Corrupt(format!("{column} is not bytes")))
}

/// Returns the stored `shard_id` cell.
pub(crate) fn stored_shard(row: &Row) -> Result<ShardId, RepositoryError> {
    let raw = integer(row, "shard_id")?;
    u32::try_from(raw)
        .map(ShardId::new)
        .map_err(|_| RepositoryError::Corrupt(format!("shard_id {raw} is out of range")))
}

/// Returns the `shard_id` cell value for a shard.
pub(crate) fn shard_value(shard_id: ShardId) -> Value {
    Value::Integer(i64::from(shard_id.get()))
}

/// Checks a row's stored shard against routing for `tenant`.
///
/// A mismatch is recorded as [`AuditKind::ShardMismatch`] and returned as
/// [`RepositoryError::Routing`]; it is never corrected in place.
pub(crate) fn ensure_routed(
    router: &ShardRouter,
    audit: &dyn AuditSink,
    tenant: &TenantId,
    stored: ShardId,
) -> Result<(), RepositoryError> {
    router.ensure_consistent(tenant, stored).map_err(|err| {
        audit.record(
            &StorageAuditEvent::new(AuditKind::ShardMismatch)
                .shard(stored)
                .tenant(tenant)
                .message(format!("routed to shard {}", router.shard_id(tenant))),
        );
        RepositoryError::from(err)
    })
}

/// Returns the current time in milliseconds since epoch.
pub(crate) fn now_ms() -> i64 {
    let ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    i64::try_from(ms).unwrap_or(i64::MAX)
}
