// crates/shardvault-core/src/lib.rs
// ============================================================================
// Module: ShardVault Core Library
// Description: Public API surface for tenant crypto, routing, and secrets.
// Purpose: Expose the pure building blocks consumed by the storage layer.
// Dependencies: crate::{audit, crypto, identifiers, routing, secrets}
// ============================================================================

//! ## Overview
//! ShardVault core holds the components that carry no connection state:
//! the tenant-scoped [`KeyManager`], the deterministic [`ShardRouter`], the
//! [`SecretProvider`] interface, and the structured audit sinks used by every
//! other crate in the workspace. Everything here is safe for unsynchronized
//! concurrent use.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod crypto;
pub mod identifiers;
pub mod routing;
pub mod secrets;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditKind;
pub use audit::AuditLevel;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use audit::StorageAuditEvent;
pub use crypto::CryptoError;
pub use crypto::DerivedKey;
pub use crypto::KeyManager;
pub use crypto::MasterKeyMode;
pub use crypto::MasterKeyNormalization;
pub use identifiers::ShardId;
pub use identifiers::TenantId;
pub use routing::DEFAULT_NUM_SHARDS;
pub use routing::RoutingError;
pub use routing::ShardRouter;
pub use secrets::DatabaseCredentials;
pub use secrets::EnvSecretProvider;
pub use secrets::SecretError;
pub use secrets::SecretProvider;
pub use secrets::StaticSecretProvider;
