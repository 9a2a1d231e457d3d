// crates/shardvault-store/src/lib.rs
// ============================================================================
// Module: ShardVault Store Library
// Description: Sharded, transactional storage for tenant-encrypted records.
// Purpose: Expose the pool manager, sessions, and repositories.
// Dependencies: crate::{manager, memory, postgres, schema, session, ...}
// ============================================================================

//! ## Overview
//! The store crate turns the pure core components into a data-access layer.
//! [`ConnectionPoolManager`] hands out scoped connections per shard, backed by
//! a Postgres pool when the shard is reachable and by [`InMemoryTables`]
//! otherwise. [`PatientRepository`] and [`MedicationLedger`] route by patient
//! id and run every operation inside one scoped transaction.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod manager;
pub mod medications;
pub mod memory;
pub mod patients;
pub mod postgres;
pub mod repository;
pub mod schema;
pub mod session;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use manager::ConnectionPoolManager;
pub use manager::PoolError;
pub use manager::ScopedConnection;
pub use manager::ShardState;
pub use manager::ShardStatus;
pub use medications::AdherenceEvent;
pub use medications::AdherenceEventType;
pub use medications::DEFAULT_ADHERENCE_WINDOW_DAYS;
pub use medications::DEFAULT_REFILL_THRESHOLD;
pub use medications::Medication;
pub use medications::MedicationLedger;
pub use medications::NewMedication;
pub use medications::doses_per_day_for;
pub use memory::InMemoryTables;
pub use memory::MemorySession;
pub use patients::PatientRecord;
pub use patients::PatientRepository;
pub use postgres::ConnectionParams;
pub use postgres::PostgresSession;
pub use repository::RepositoryError;
pub use schema::Row;
pub use schema::Select;
pub use schema::Table;
pub use schema::Update;
pub use schema::Value;
pub use session::SessionError;
pub use session::ShardSession;
