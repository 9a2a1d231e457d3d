// crates/shardvault-store/src/memory.rs
// ============================================================================
// Module: ShardVault In-Memory Shard Store
// Description: Process-local table store used by shards in MOCK state.
// Purpose: Keep a degraded shard serving reads and writes without a database.
// Dependencies: shardvault-core
// ============================================================================

//! ## Overview
//! [`InMemoryTables`] holds the rows of one shard behind a mutex.
//! [`MemorySession`] stages every write locally: reads inside the session see
//! committed rows plus the session's own staged writes, [`MemorySession::commit`]
//! publishes the staged writes atomically, and dropping or rolling back the
//! session discards them. Callers therefore get the same commit/rollback
//! behavior on a degraded shard as on a live one.
//!
//! Nothing here is durable; rows vanish with the process.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use shardvault_core::ShardId;

use crate::schema::Row;
use crate::schema::Select;
use crate::schema::Table;
use crate::schema::Update;
use crate::session::SessionError;
use crate::session::ShardSession;

// ============================================================================
// SECTION: Tables
// ============================================================================

/// Rows of every table on one shard.
type TableMap = BTreeMap<Table, Vec<Row>>;

/// Shared in-memory table store for one shard.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTables {
    /// Committed rows protected by a mutex.
    tables: Arc<Mutex<TableMap>>,
}

impl InMemoryTables {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session that stages writes against this store.
    #[must_use]
    pub fn session(&self, shard_id: ShardId) -> MemorySession {
        MemorySession {
            shard_id,
            tables: self.clone(),
            staged: Vec::new(),
        }
    }

    /// Returns the number of committed rows in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Backend`] when the store mutex is poisoned.
    pub fn row_count(&self, table: Table) -> Result<usize, SessionError> {
        Ok(self.snapshot(table)?.len())
    }

    /// Returns a copy of the committed rows in `table`.
    fn snapshot(&self, table: Table) -> Result<Vec<Row>, SessionError> {
        let guard = self
            .tables
            .lock()
            .map_err(|_| SessionError::Backend("in-memory shard mutex poisoned".to_string()))?;
        Ok(guard.get(&table).cloned().unwrap_or_default())
    }

    /// Applies staged writes all-or-nothing.
    fn publish(&self, staged: &[StagedWrite]) -> Result<(), SessionError> {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| SessionError::Backend("in-memory shard mutex poisoned".to_string()))?;
        let mut next = guard.clone();
        for write in staged {
            write.apply(next.entry(write.table()).or_default())?;
        }
        *guard = next;
        Ok(())
    }
}

// ============================================================================
// SECTION: Staged Writes
// ============================================================================

/// Write recorded by a session and replayed on commit.
#[derive(Debug, Clone)]
enum StagedWrite {
    /// Row insertion.
    Insert(Table, Row),
    /// Filtered update.
    Update(Update),
}

impl StagedWrite {
    /// Returns the table this write targets.
    const fn table(&self) -> Table {
        match self {
            Self::Insert(table, _) => *table,
            Self::Update(update) => update.table,
        }
    }

    /// Applies the write to `rows` and returns the number of affected rows.
    fn apply(&self, rows: &mut Vec<Row>) -> Result<u64, SessionError> {
        match self {
            Self::Insert(table, row) => {
                let key = table.primary_key();
                if rows.iter().any(|existing| existing.get(key) == row.get(key)) {
                    return Err(SessionError::Constraint(format!(
                        "duplicate {}.{key}",
                        table.name()
                    )));
                }
                rows.push(row.clone());
                Ok(1)
            }
            Self::Update(update) => {
                let mut affected = 0;
                for row in rows.iter_mut().filter(|row| update.matches(row)) {
                    update.apply(row);
                    affected += 1;
                }
                Ok(affected)
            }
        }
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Session over an in-memory shard.
///
/// # Invariants
/// - Staged writes are invisible to other sessions until commit.
#[derive(Debug)]
pub struct MemorySession {
    /// Shard the session is bound to.
    shard_id: ShardId,
    /// Backing store.
    tables: InMemoryTables,
    /// Writes awaiting commit, in issue order.
    staged: Vec<StagedWrite>,
}

impl MemorySession {
    /// Publishes every staged write.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when a staged write conflicts with rows
    /// committed since it was staged; nothing is published in that case.
    pub fn commit(self) -> Result<(), SessionError> {
        self.tables.publish(&self.staged)
    }

    /// Discards every staged write.
    pub fn rollback(self) {
        drop(self.staged);
    }

    /// Returns committed rows of `table` with this session's writes applied.
    fn view(&self, table: Table) -> Result<Vec<Row>, SessionError> {
        let mut rows = self.tables.snapshot(table)?;
        for write in self.staged.iter().filter(|write| write.table() == table) {
            write.apply(&mut rows)?;
        }
        Ok(rows)
    }

    /// Validates a write against the current view and stages it.
    fn stage(&mut self, write: StagedWrite) -> Result<u64, SessionError> {
        let mut rows = self.view(write.table())?;
        let affected = write.apply(&mut rows)?;
        self.staged.push(write);
        Ok(affected)
    }
}

impl ShardSession for MemorySession {
    fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    fn insert(&mut self, table: Table, row: Row) -> Result<(), SessionError> {
        let row = table.normalize_row(row)?;
        self.stage(StagedWrite::Insert(table, row))?;
        Ok(())
    }

    fn select(&mut self, query: &Select) -> Result<Vec<Row>, SessionError> {
        query.validate()?;
        let mut rows: Vec<Row> = self
            .view(query.table)?
            .into_iter()
            .filter(|row| query.filters.iter().all(|filter| filter.matches(row)))
            .collect();
        if !query.order_by.is_empty() {
            rows.sort_by(|left, right| query.sort_key(left).cmp(&query.sort_key(right)));
        }
        Ok(rows.iter().map(|row| query.project(row)).collect())
    }

    fn update(&mut self, update: &Update) -> Result<u64, SessionError> {
        update.validate()?;
        self.stage(StagedWrite::Update(update.clone()))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
