// crates/shardvault-store/src/session.rs
// ============================================================================
// Module: ShardVault Shard Sessions
// Description: Backend-neutral interface for statements inside one scope.
// Purpose: Let repositories run the same code against live and fallback shards.
// Dependencies: shardvault-core, thiserror
// ============================================================================

//! ## Overview
//! A [`ShardSession`] is the statement surface of one scoped acquisition. All
//! statements issued through a session belong to one transaction; the owning
//! scope decides whether it commits or rolls back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use shardvault_core::ShardId;
use thiserror::Error;

use crate::schema::Row;
use crate::schema::Select;
use crate::schema::Table;
use crate::schema::Update;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Statement execution errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Statement referenced an unknown column or carried a mistyped value.
    #[error("schema violation: {0}")]
    Schema(String),
    /// Insert collided with an existing primary key.
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// Backing store rejected or failed the statement.
    #[error("backend failure: {0}")]
    Backend(String),
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Statement surface of a scoped shard acquisition.
pub trait ShardSession {
    /// Returns the shard this session is bound to.
    fn shard_id(&self) -> ShardId;

    /// Inserts one row.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the row is invalid or the insert fails.
    fn insert(&mut self, table: Table, row: Row) -> Result<(), SessionError>;

    /// Returns rows matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the query is invalid or the read fails.
    fn select(&mut self, query: &Select) -> Result<Vec<Row>, SessionError>;

    /// Applies `update` and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the update is invalid or fails.
    fn update(&mut self, update: &Update) -> Result<u64, SessionError>;

    /// Returns the first row matching `query`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the query is invalid or the read fails.
    fn select_one(&mut self, query: &Select) -> Result<Option<Row>, SessionError> {
        Ok(self.select(query)?.into_iter().next())
    }
}
