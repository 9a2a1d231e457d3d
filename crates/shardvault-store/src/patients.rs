// crates/shardvault-store/src/patients.rs
// ============================================================================
// Module: ShardVault Patient Repository
// Description: Encrypted patient records routed to their owning shard.
// Purpose: Store demographics encrypted under the patient's derived key.
// Dependencies: shardvault-core, uuid
// ============================================================================

//! ## Overview
//! The patient id is both the tenant id for key derivation and the routing
//! key. Name and medical history are encrypted before they leave the process;
//! every read checks the stored `shard_id` against the router before
//! decrypting.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use shardvault_core::AuditKind;
use shardvault_core::AuditSink;
use shardvault_core::CryptoError;
use shardvault_core::KeyManager;
use shardvault_core::ShardId;
use shardvault_core::ShardRouter;
use shardvault_core::StorageAuditEvent;
use shardvault_core::TenantId;
use uuid::Uuid;

use crate::manager::ConnectionPoolManager;
use crate::repository::RepositoryError;
use crate::repository::bytes;
use crate::repository::ensure_routed;
use crate::repository::integer;
use crate::repository::now_ms;
use crate::repository::shard_value;
use crate::repository::stored_shard;
use crate::schema::Select;
use crate::schema::Table;
use crate::schema::Update;
use crate::schema::Value;
use crate::schema::row;
use crate::session::ShardSession;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Decrypted patient record.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct PatientRecord {
    /// Patient identifier (tenant id).
    pub patient_id: TenantId,
    /// Patient name.
    pub name: String,
    /// Free-text medical history.
    pub medical_history: String,
    /// Shard holding the record.
    pub shard_id: ShardId,
    /// Creation time (milliseconds since epoch).
    pub created_at_ms: i64,
}

impl fmt::Debug for PatientRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatientRecord")
            .field("patient_id", &self.patient_id.redacted())
            .field("name", &"<redacted>")
            .field("medical_history", &"<redacted>")
            .field("shard_id", &self.shard_id)
            .field("created_at_ms", &self.created_at_ms)
            .finish()
    }
}

/// Patient repository over the sharded store.
#[derive(Clone)]
pub struct PatientRepository {
    /// Tenant key manager.
    keys: Arc<KeyManager>,
    /// Shard router.
    router: ShardRouter,
    /// Shard connections.
    pools: Arc<ConnectionPoolManager>,
    /// Audit sink for integrity failures.
    audit: Arc<dyn AuditSink>,
}

impl PatientRepository {
    /// Creates a repository.
    #[must_use]
    pub fn new(
        keys: Arc<KeyManager>,
        router: ShardRouter,
        pools: Arc<ConnectionPoolManager>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            keys,
            router,
            pools,
            audit,
        }
    }

    /// Creates a patient with a fresh random id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when encryption or the insert fails.
    pub fn create_patient(
        &self,
        name: &str,
        medical_history: &str,
    ) -> Result<PatientRecord, RepositoryError> {
        let patient_id = TenantId::new(Uuid::new_v4().to_string());
        self.create_patient_with_id(patient_id, name, medical_history)
    }

    /// Creates a patient under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when encryption or the insert fails,
    /// including a constraint error for an existing id.
    pub fn create_patient_with_id(
        &self,
        patient_id: TenantId,
        name: &str,
        medical_history: &str,
    ) -> Result<PatientRecord, RepositoryError> {
        let shard_id = self.router.shard_id(&patient_id);
        let encrypted_name = self.keys.encrypt(name, &patient_id)?;
        let encrypted_history = self.keys.encrypt(medical_history, &patient_id)?;
        let created_at_ms = now_ms();
        let record = row([
            ("patient_id", Value::from(patient_id.as_str())),
            ("encrypted_name", Value::from(encrypted_name)),
            ("encrypted_history", Value::from(encrypted_history)),
            ("shard_id", shard_value(shard_id)),
            ("created_at", Value::from(created_at_ms)),
        ]);
        self.pools.with_connection(shard_id, |conn| {
            conn.insert(Table::PatientRecords, record).map_err(RepositoryError::from)
        })?;
        Ok(PatientRecord {
            patient_id,
            name: name.to_string(),
            medical_history: medical_history.to_string(),
            shard_id,
            created_at_ms,
        })
    }

    /// Loads and decrypts a patient.
    ///
    /// Returns `Ok(None)` when the patient does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Routing`] when the stored shard disagrees
    /// with routing and [`RepositoryError::Crypto`] when decryption fails;
    /// both are audited.
    pub fn get_patient(
        &self,
        patient_id: &TenantId,
    ) -> Result<Option<PatientRecord>, RepositoryError> {
        let shard_id = self.router.shard_id(patient_id);
        let query = Select::table(Table::PatientRecords).filter("patient_id", patient_id.as_str());
        let found = self.pools.with_connection(shard_id, |conn| {
            conn.select_one(&query).map_err(RepositoryError::from)
        })?;
        let Some(found) = found else {
            return Ok(None);
        };
        let stored = stored_shard(&found)?;
        ensure_routed(&self.router, self.audit.as_ref(), patient_id, stored)?;
        let name = self.decrypt(&bytes(&found, "encrypted_name")?, patient_id, stored)?;
        let medical_history =
            self.decrypt(&bytes(&found, "encrypted_history")?, patient_id, stored)?;
        Ok(Some(PatientRecord {
            patient_id: patient_id.clone(),
            name,
            medical_history,
            shard_id: stored,
            created_at_ms: integer(&found, "created_at")?,
        }))
    }

    /// Re-encrypts and replaces the supplied fields.
    ///
    /// Returns `false` when nothing was supplied or the patient does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when encryption or the update fails.
    pub fn update_patient(
        &self,
        patient_id: &TenantId,
        name: Option<&str>,
        medical_history: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        if name.is_none() && medical_history.is_none() {
            return Ok(false);
        }
        let mut update = Update::table(Table::PatientRecords);
        if let Some(name) = name {
            update = update.set("encrypted_name", self.keys.encrypt(name, patient_id)?);
        }
        if let Some(history) = medical_history {
            update = update.set("encrypted_history", self.keys.encrypt(history, patient_id)?);
        }
        let update = update.filter("patient_id", patient_id.as_str());
        let shard_id = self.router.shard_id(patient_id);
        let affected = self.pools.with_connection(shard_id, |conn| {
            conn.update(&update).map_err(RepositoryError::from)
        })?;
        Ok(affected > 0)
    }

    /// Decrypts one field, auditing integrity failures.
    fn decrypt(
        &self,
        blob: &[u8],
        patient_id: &TenantId,
        shard_id: ShardId,
    ) -> Result<String, RepositoryError> {
        self.keys.decrypt(blob, patient_id).map_err(|err| {
            if matches!(err, CryptoError::Integrity(_) | CryptoError::Format(_)) {
                self.audit.record(
                    &StorageAuditEvent::new(AuditKind::DecryptFailed)
                        .shard(shard_id)
                        .tenant(patient_id)
                        .message(err.to_string()),
                );
            }
            RepositoryError::from(err)
        })
    }
}
