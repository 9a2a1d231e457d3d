// crates/shardvault-config/src/services.rs
// ============================================================================
// Module: ShardVault Services
// Description: Dependency container built from validated configuration.
// Purpose: Wire secrets, keys, routing, pools, and repositories in one place.
// Dependencies: shardvault-core, shardvault-store
// ============================================================================

//! ## Overview
//! [`Services::bootstrap`] builds the storage layer leaf-first: the secret
//! provider supplies the master key, the [`KeyManager`] is initialized once,
//! the [`ShardRouter`] fixes the shard count, and every shard in
//! `[0, num_shards)` is registered with the [`ConnectionPoolManager`] before
//! the repositories are handed out. A shard whose database is unreachable
//! degrades to the in-memory store; bootstrap itself only fails on missing
//! secrets or invalid configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use shardvault_core::AuditKind;
use shardvault_core::AuditSink;
use shardvault_core::CryptoError;
use shardvault_core::KeyManager;
use shardvault_core::MasterKeyNormalization;
use shardvault_core::RoutingError;
use shardvault_core::SecretProvider;
use shardvault_core::ShardRouter;
use shardvault_core::StorageAuditEvent;
use shardvault_store::ConnectionPoolManager;
use shardvault_store::MedicationLedger;
use shardvault_store::PatientRepository;
use shardvault_store::PoolError;
use shardvault_store::ShardState;
use shardvault_store::ShardStatus;
use thiserror::Error;

use crate::config::ConfigError;
use crate::config::ShardVaultConfig;
use crate::config::StorageBackend;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Service bootstrap errors.
#[derive(Debug, Error)]
pub enum ServicesError {
    /// Configuration or secrets are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Master key was rejected.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Shard count was rejected.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// Shard registration or shutdown failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

// ============================================================================
// SECTION: Services
// ============================================================================

/// Initialized storage services.
pub struct Services {
    /// Tenant key manager.
    keys: Arc<KeyManager>,
    /// Shard router.
    router: ShardRouter,
    /// Shard connections.
    pools: Arc<ConnectionPoolManager>,
    /// Patient repository.
    patients: PatientRepository,
    /// Medication ledger.
    medications: MedicationLedger,
}

impl Services {
    /// Builds services using the provider and sink selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError`] when configuration, secrets, or the master
    /// key are unusable.
    pub fn from_config(config: &ShardVaultConfig) -> Result<Self, ServicesError> {
        config.validate()?;
        let audit = config.audit.build_sink()?;
        let secrets = config.secrets.provider();
        Self::bootstrap(config, secrets.as_ref(), audit)
    }

    /// Builds services from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError`] when the master key is missing or rejected,
    /// shard credentials are missing or malformed, or pool bounds are invalid.
    pub fn bootstrap(
        config: &ShardVaultConfig,
        secrets: &dyn SecretProvider,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ServicesError> {
        let keys = Arc::new(load_key_manager(config, secrets, audit.as_ref())?);
        let router = ShardRouter::new(config.router.num_shards)?;
        let pools = Arc::new(ConnectionPoolManager::new(Arc::clone(&audit)));
        for shard_id in router.shard_ids() {
            match config.storage.backend {
                StorageBackend::Memory => {
                    pools.add_memory_shard(shard_id)?;
                }
                StorageBackend::Postgres => {
                    let credentials =
                        secrets.database_credentials(shard_id).map_err(ConfigError::from)?;
                    let params = config.storage.connection_params(credentials);
                    pools.add_shard(
                        shard_id,
                        &params,
                        config.storage.min_connections,
                        config.storage.max_connections,
                    )?;
                }
            }
        }
        Ok(Self {
            patients: PatientRepository::new(
                Arc::clone(&keys),
                router,
                Arc::clone(&pools),
                Arc::clone(&audit),
            ),
            medications: MedicationLedger::new(router, Arc::clone(&pools), audit),
            keys,
            router,
            pools,
        })
    }

    /// Returns the key manager.
    #[must_use]
    pub const fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Returns the shard router.
    #[must_use]
    pub const fn router(&self) -> ShardRouter {
        self.router
    }

    /// Returns the pool manager.
    #[must_use]
    pub const fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }

    /// Returns the patient repository.
    #[must_use]
    pub const fn patients(&self) -> &PatientRepository {
        &self.patients
    }

    /// Returns the medication ledger.
    #[must_use]
    pub const fn medications(&self) -> &MedicationLedger {
        &self.medications
    }

    /// Returns per-shard status.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Pool`] when the shard registry is unusable.
    pub fn status(&self) -> Result<Vec<ShardStatus>, ServicesError> {
        Ok(self.pools.status()?)
    }

    /// Returns whether any shard is serving from the in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Pool`] when the shard registry is unusable.
    pub fn is_degraded(&self) -> Result<bool, ServicesError> {
        Ok(self.status()?.iter().any(|shard| shard.state == ShardState::Mock))
    }

    /// Closes every live pool. Returns the number of pools closed.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Pool`] when the shard registry is unusable.
    pub fn shutdown(&self) -> Result<usize, ServicesError> {
        Ok(self.pools.close_all()?)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Initializes the [`KeyManager`] from the configured master key.
///
/// Any non-verbatim normalization of the secret is recorded as a
/// `master_key_normalized` audit event.
///
/// # Errors
///
/// Returns [`ServicesError::Config`] when the master key is unavailable and
/// [`ServicesError::Crypto`] when the configured mode rejects it.
pub fn load_key_manager(
    config: &ShardVaultConfig,
    secrets: &dyn SecretProvider,
    audit: &dyn AuditSink,
) -> Result<KeyManager, ServicesError> {
    let master_key = secrets.master_encryption_key().map_err(ConfigError::from)?;
    let keys = KeyManager::new(&master_key, config.crypto.master_key_mode)?;
    if let Some(message) = describe_normalization(keys.normalization()) {
        audit.record(&StorageAuditEvent::new(AuditKind::MasterKeyNormalized).message(message));
    }
    Ok(keys)
}

/// Describes a non-verbatim master key normalization for the audit log.
fn describe_normalization(normalization: MasterKeyNormalization) -> Option<String> {
    match normalization {
        MasterKeyNormalization::Verbatim => None,
        MasterKeyNormalization::Derived {
            original_len,
        } => Some(format!("{original_len}-byte master secret stretched with hkdf")),
        MasterKeyNormalization::Padded {
            original_len,
        } => Some(format!("{original_len}-byte master secret zero-padded to 32 bytes")),
        MasterKeyNormalization::Truncated {
            original_len,
        } => Some(format!("{original_len}-byte master secret truncated to 32 bytes")),
    }
}
