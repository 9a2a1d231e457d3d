// crates/shardvault-store/src/manager.rs
// ============================================================================
// Module: ShardVault Connection Pool Manager
// Description: Per-shard pool registry with explicit degraded-mode fallback.
// Purpose: Hand out scoped, transactional shard sessions with guaranteed release.
// Dependencies: r2d2, serde, shardvault-core, thiserror
// ============================================================================

//! ## Overview
//! [`ConnectionPoolManager`] tracks one backend per shard. A shard is `LIVE`
//! when its Postgres pool was built and provisioned, `MOCK` when the attempt
//! failed (or the shard was never registered) and it is served from
//! [`InMemoryTables`], and `CLOSED` after [`ConnectionPoolManager::close_all`]
//! released its pool. Every transition is reported to the audit sink.
//!
//! There is no automatic `MOCK -> LIVE` recovery; a shard returns to `LIVE`
//! only through an explicit [`ConnectionPoolManager::add_shard`].
//!
//! Security posture: audit events name shard endpoints but never credentials.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::RwLock;

use serde::Serialize;
use shardvault_core::AuditKind;
use shardvault_core::AuditSink;
use shardvault_core::ShardId;
use shardvault_core::StorageAuditEvent;
use thiserror::Error;

use crate::memory::InMemoryTables;
use crate::memory::MemorySession;
use crate::postgres::ConnectionParams;
use crate::postgres::PgPool;
use crate::postgres::PostgresSession;
use crate::postgres::connect_pool;
use crate::schema::Row;
use crate::schema::Select;
use crate::schema::Table;
use crate::schema::Update;
use crate::session::SessionError;
use crate::session::ShardSession;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Connection pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Shard backing store could not be reached at registration.
    #[error("shard {shard} unavailable: {reason}")]
    ConnectionUnavailable {
        /// Shard that failed to connect.
        shard: ShardId,
        /// Driver or pool failure description.
        reason: String,
    },
    /// No pooled connection became free within the acquire timeout.
    #[error("shard {shard} pool exhausted: {reason}")]
    PoolExhausted {
        /// Saturated shard.
        shard: ShardId,
        /// Pool failure description.
        reason: String,
    },
    /// Shard pool was released by `close_all`.
    #[error("shard {0} pool is closed")]
    Closed(ShardId),
    /// Pool bounds or timeouts are unusable.
    #[error("invalid pool bounds: {0}")]
    InvalidBounds(String),
    /// Shard registry lock was poisoned by a panicking thread.
    #[error("shard registry lock poisoned")]
    Poisoned,
    /// Statement or transaction control failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl PoolError {
    /// Returns whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

// ============================================================================
// SECTION: Shard State
// ============================================================================

/// Observable shard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    /// Served by a Postgres pool.
    Live,
    /// Served by the in-memory fallback store.
    Mock,
    /// Pool released; acquisitions fail until re-registration.
    Closed,
}

impl ShardState {
    /// Returns a stable label for output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Mock => "MOCK",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time shard report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStatus {
    /// Shard identifier.
    pub shard_id: ShardId,
    /// Current state.
    pub state: ShardState,
    /// Open pooled connections (zero unless live).
    pub connections: u32,
    /// Idle pooled connections (zero unless live).
    pub idle_connections: u32,
}

/// Backend registered for a shard.
#[derive(Clone)]
enum Backend {
    /// Postgres pool.
    Live(PgPool),
    /// In-memory fallback store.
    Mock(InMemoryTables),
    /// Released pool.
    Closed,
}

impl Backend {
    /// Returns the observable state.
    const fn state(&self) -> ShardState {
        match self {
            Self::Live(_) => ShardState::Live,
            Self::Mock(_) => ShardState::Mock,
            Self::Closed => ShardState::Closed,
        }
    }
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Registry of per-shard backends.
///
/// # Invariants
/// - Pools are built outside the registry lock; the lock is held only to
///   read or swap a shard's backend.
/// - Each [`ScopedConnection`] exclusively owns its connection or session.
pub struct ConnectionPoolManager {
    /// Backends keyed by shard.
    shards: RwLock<BTreeMap<ShardId, Backend>>,
    /// Audit sink for state transitions.
    audit: Arc<dyn AuditSink>,
}

impl ConnectionPoolManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            shards: RwLock::new(BTreeMap::new()),
            audit,
        }
    }

    /// Registers a shard against Postgres, degrading to `MOCK` on failure.
    ///
    /// Re-registering a shard replaces its backend. A shard that degrades
    /// again keeps its existing in-memory rows.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidBounds`] for unusable bounds and
    /// [`PoolError::Poisoned`] when the registry lock is poisoned. An
    /// unreachable shard is not an error.
    pub fn add_shard(
        &self,
        shard_id: ShardId,
        params: &ConnectionParams,
        min_pool_size: u32,
        max_pool_size: u32,
    ) -> Result<ShardState, PoolError> {
        validate_bounds(min_pool_size, max_pool_size, params.acquire_timeout_ms)?;
        match connect_pool(params, min_pool_size, max_pool_size) {
            Ok(pool) => {
                self.install(shard_id, Backend::Live(pool))?;
                self.audit.record(
                    &StorageAuditEvent::new(AuditKind::ShardRegisteredLive)
                        .shard(shard_id)
                        .message(format!(
                            "{} pool {min_pool_size}..={max_pool_size}",
                            params.credentials.endpoint_label()
                        )),
                );
                Ok(ShardState::Live)
            }
            Err(reason) => {
                let err = PoolError::ConnectionUnavailable {
                    shard: shard_id,
                    reason,
                };
                let tables = self.existing_tables(shard_id)?.unwrap_or_default();
                self.install(shard_id, Backend::Mock(tables))?;
                self.audit.record(
                    &StorageAuditEvent::new(AuditKind::ShardDegraded)
                        .shard(shard_id)
                        .message(err.to_string()),
                );
                Ok(ShardState::Mock)
            }
        }
    }

    /// Registers a shard against the in-memory store without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Poisoned`] when the registry lock is poisoned.
    pub fn add_memory_shard(&self, shard_id: ShardId) -> Result<ShardState, PoolError> {
        let tables = self.existing_tables(shard_id)?.unwrap_or_default();
        self.install(shard_id, Backend::Mock(tables))?;
        self.audit.record(&StorageAuditEvent::new(AuditKind::ShardRegisteredMemory).shard(shard_id));
        Ok(ShardState::Mock)
    }

    /// Returns the state of a registered shard.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Poisoned`] when the registry lock is poisoned.
    pub fn state(&self, shard_id: ShardId) -> Result<Option<ShardState>, PoolError> {
        let guard = self.shards.read().map_err(|_| PoolError::Poisoned)?;
        Ok(guard.get(&shard_id).map(Backend::state))
    }

    /// Acquires a scoped connection to `shard_id`.
    ///
    /// An unregistered shard is registered as `MOCK` and reported. Dropping
    /// the returned connection without committing rolls it back.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::PoolExhausted`] when no live connection frees up
    /// within the acquire timeout, [`PoolError::Closed`] for released shards.
    pub fn get_connection(&self, shard_id: ShardId) -> Result<ScopedConnection, PoolError> {
        match self.resolve(shard_id)? {
            Backend::Live(pool) => {
                let conn = pool.get().map_err(|err| PoolError::PoolExhausted {
                    shard: shard_id,
                    reason: err.to_string(),
                })?;
                Ok(ScopedConnection::Live(PostgresSession::begin(
                    shard_id,
                    conn,
                    Arc::clone(&self.audit),
                )?))
            }
            Backend::Mock(tables) => Ok(ScopedConnection::Mock(tables.session(shard_id))),
            Backend::Closed => Err(PoolError::Closed(shard_id)),
        }
    }

    /// Runs `body` inside one scoped transaction on `shard_id`.
    ///
    /// Commits when `body` returns `Ok`; rolls back, records an audit event,
    /// and returns the original error when it returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns acquisition and commit failures converted into `E`, or the
    /// error produced by `body`.
    pub fn with_connection<T, E, F>(&self, shard_id: ShardId, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut ScopedConnection) -> Result<T, E>,
        E: From<PoolError> + fmt::Display,
    {
        let mut conn = self.get_connection(shard_id)?;
        match body(&mut conn) {
            Ok(value) => {
                conn.commit().map_err(|err| E::from(PoolError::Session(err)))?;
                Ok(value)
            }
            Err(err) => {
                let rollback = conn.rollback();
                let mut message = err.to_string();
                if let Err(rollback_err) = rollback {
                    message.push_str(&format!("; rollback failed: {rollback_err}"));
                }
                self.audit.record(
                    &StorageAuditEvent::new(AuditKind::TransactionRolledBack)
                        .shard(shard_id)
                        .message(message),
                );
                Err(err)
            }
        }
    }

    /// Reports every registered shard in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Poisoned`] when the registry lock is poisoned.
    pub fn status(&self) -> Result<Vec<ShardStatus>, PoolError> {
        let guard = self.shards.read().map_err(|_| PoolError::Poisoned)?;
        Ok(guard
            .iter()
            .map(|(shard_id, backend)| {
                let (connections, idle_connections) = match backend {
                    Backend::Live(pool) => {
                        let state = pool.state();
                        (state.connections, state.idle_connections)
                    }
                    Backend::Mock(_) | Backend::Closed => (0, 0),
                };
                ShardStatus {
                    shard_id: *shard_id,
                    state: backend.state(),
                    connections,
                    idle_connections,
                }
            })
            .collect())
    }

    /// Releases every live pool and returns how many were released.
    ///
    /// Idempotent; `MOCK` shards keep their rows. Connections still checked
    /// out close when their scopes end.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Poisoned`] when the registry lock is poisoned.
    pub fn close_all(&self) -> Result<usize, PoolError> {
        let released: Vec<PgPool> = {
            let mut guard = self.shards.write().map_err(|_| PoolError::Poisoned)?;
            guard
                .values_mut()
                .filter(|backend| matches!(backend, Backend::Live(_)))
                .filter_map(|backend| match std::mem::replace(backend, Backend::Closed) {
                    Backend::Live(pool) => Some(pool),
                    Backend::Mock(_) | Backend::Closed => None,
                })
                .collect()
        };
        let count = released.len();
        drop(released);
        if count > 0 {
            self.audit.record(
                &StorageAuditEvent::new(AuditKind::PoolsClosed)
                    .message(format!("released {count} pool(s)")),
            );
        }
        Ok(count)
    }

    /// Returns the backend for `shard_id`, auto-registering it as `MOCK`.
    fn resolve(&self, shard_id: ShardId) -> Result<Backend, PoolError> {
        {
            let guard = self.shards.read().map_err(|_| PoolError::Poisoned)?;
            if let Some(backend) = guard.get(&shard_id) {
                return Ok(backend.clone());
            }
        }
        let mut guard = self.shards.write().map_err(|_| PoolError::Poisoned)?;
        if let Some(backend) = guard.get(&shard_id) {
            return Ok(backend.clone());
        }
        let backend = Backend::Mock(InMemoryTables::new());
        guard.insert(shard_id, backend.clone());
        drop(guard);
        self.audit.record(
            &StorageAuditEvent::new(AuditKind::ShardAutoRegistered)
                .shard(shard_id)
                .message("unregistered shard served from in-memory store"),
        );
        Ok(backend)
    }

    /// Returns the in-memory rows of a shard previously served in memory.
    fn existing_tables(&self, shard_id: ShardId) -> Result<Option<InMemoryTables>, PoolError> {
        let guard = self.shards.read().map_err(|_| PoolError::Poisoned)?;
        Ok(match guard.get(&shard_id) {
            Some(Backend::Mock(tables)) => Some(tables.clone()),
            _ => None,
        })
    }

    /// Swaps in a backend; the previous one is dropped after the lock.
    fn install(&self, shard_id: ShardId, backend: Backend) -> Result<(), PoolError> {
        let previous = {
            let mut guard = self.shards.write().map_err(|_| PoolError::Poisoned)?;
            guard.insert(shard_id, backend)
        };
        drop(previous);
        Ok(())
    }
}

/// Rejects bounds the pool builder would refuse.
fn validate_bounds(min: u32, max: u32, acquire_timeout_ms: u64) -> Result<(), PoolError> {
    if max == 0 {
        return Err(PoolError::InvalidBounds("max_pool_size must be greater than zero".to_string()));
    }
    if min > max {
        return Err(PoolError::InvalidBounds(format!(
            "min_pool_size {min} exceeds max_pool_size {max}"
        )));
    }
    if acquire_timeout_ms == 0 {
        return Err(PoolError::InvalidBounds(
            "acquire_timeout_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Scoped Connection
// ============================================================================

/// Exclusive, transactional handle on one shard.
///
/// Dropping the handle without [`ScopedConnection::commit`] rolls back and
/// releases the underlying connection.
pub enum ScopedConnection {
    /// Pooled Postgres connection.
    Live(PostgresSession),
    /// In-memory session.
    Mock(MemorySession),
}

impl ScopedConnection {
    /// Returns the state of the shard that served this connection.
    #[must_use]
    pub const fn state(&self) -> ShardState {
        match self {
            Self::Live(_) => ShardState::Live,
            Self::Mock(_) => ShardState::Mock,
        }
    }

    /// Commits every statement issued through this connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the commit fails.
    pub fn commit(self) -> Result<(), SessionError> {
        match self {
            Self::Live(session) => session.commit(),
            Self::Mock(session) => session.commit(),
        }
    }

    /// Discards every statement issued through this connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when a live rollback fails.
    pub fn rollback(self) -> Result<(), SessionError> {
        match self {
            Self::Live(session) => session.rollback(),
            Self::Mock(session) => {
                session.rollback();
                Ok(())
            }
        }
    }
}

impl ShardSession for ScopedConnection {
    fn shard_id(&self) -> ShardId {
        match self {
            Self::Live(session) => session.shard_id(),
            Self::Mock(session) => session.shard_id(),
        }
    }

    fn insert(&mut self, table: Table, row: Row) -> Result<(), SessionError> {
        match self {
            Self::Live(session) => session.insert(table, row),
            Self::Mock(session) => session.insert(table, row),
        }
    }

    fn select(&mut self, query: &Select) -> Result<Vec<Row>, SessionError> {
        match self {
            Self::Live(session) => session.select(query),
            Self::Mock(session) => session.select(query),
        }
    }

    fn update(&mut self, update: &Update) -> Result<u64, SessionError> {
        match self {
            Self::Live(session) => session.update(update),
            Self::Mock(session) => session.update(update),
        }
    }
}
