// crates/shardvault-core/src/secrets.rs
// ============================================================================
// Module: ShardVault Secret Providers
// Description: Interface for master key and per-shard credential retrieval.
// Purpose: Decouple key and pool setup from where secrets are stored.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! [`SecretProvider`] is the only seam through which key material and database
//! credentials enter the process. Two providers ship with the crate:
//! [`EnvSecretProvider`] reads the process environment, and
//! [`StaticSecretProvider`] serves a fixed set of secrets for local
//! development and tests.
//!
//! Security posture: secret values are never formatted through `Debug`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::identifiers::ShardId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable holding the master encryption key.
pub const MASTER_KEY_ENV: &str = "MASTER_ENCRYPTION_KEY";
/// Prefix for per-shard credential environment variables.
const SHARD_ENV_PREFIX: &str = "DB_SHARD";
/// Default Postgres host when none is configured.
const DEFAULT_HOST: &str = "localhost";
/// Default Postgres port when none is configured.
const DEFAULT_PORT: u16 = 5432;
/// Default Postgres user and password when none are configured.
const DEFAULT_USER: &str = "postgres";
/// Master key served by the development provider.
pub const DEV_MASTER_KEY: &str = "dev-master-key-32-bytes-long!!";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Secret retrieval errors. Both variants are fatal at startup.
#[derive(Debug, Error)]
pub enum SecretError {
    /// A required secret is not available.
    #[error("secret missing: {0}")]
    Missing(String),
    /// A secret is present but malformed.
    #[error("secret invalid: {0}")]
    Invalid(String),
}

/// Connection credentials for a single shard.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DatabaseCredentials {
    /// Returns the `database@host:port` label used in audit output.
    #[must_use]
    pub fn endpoint_label(&self) -> String {
        format!("{}@{}:{}", self.database, self.host, self.port)
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Source of the master encryption key and per-shard credentials.
pub trait SecretProvider: Send + Sync {
    /// Returns the raw master encryption key secret.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError`] when the key is unavailable.
    fn master_encryption_key(&self) -> Result<String, SecretError>;

    /// Returns connection credentials for `shard_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError`] when credentials are unavailable or malformed.
    fn database_credentials(&self, shard_id: ShardId) -> Result<DatabaseCredentials, SecretError>;
}

// ============================================================================
// SECTION: Environment Provider
// ============================================================================

/// Variable lookup used by [`EnvSecretProvider`].
type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads secrets from environment variables.
///
/// Credentials for shard `n` come from `DB_SHARD{n}_HOST`, `_PORT`,
/// `_DATABASE`, `_USER`, `_PASSWORD`, each falling back to a local default.
/// The master key has no default.
pub struct EnvSecretProvider {
    /// Variable lookup function.
    lookup: EnvLookup,
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSecretProvider {
    /// Creates a provider backed by the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a provider backed by an arbitrary lookup function.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Reads a non-empty variable.
    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }
}

impl SecretProvider for EnvSecretProvider {
    fn master_encryption_key(&self) -> Result<String, SecretError> {
        self.var(MASTER_KEY_ENV).ok_or_else(|| SecretError::Missing(MASTER_KEY_ENV.to_string()))
    }

    fn database_credentials(&self, shard_id: ShardId) -> Result<DatabaseCredentials, SecretError> {
        let prefix = format!("{SHARD_ENV_PREFIX}{shard_id}");
        let port = match self.var(&format!("{prefix}_PORT")) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                SecretError::Invalid(format!("{prefix}_PORT is not a valid port: {raw}"))
            })?,
            None => DEFAULT_PORT,
        };
        Ok(DatabaseCredentials {
            host: self.var(&format!("{prefix}_HOST")).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            database: self
                .var(&format!("{prefix}_DATABASE"))
                .unwrap_or_else(|| format!("aurahealth_shard{shard_id}")),
            username: self.var(&format!("{prefix}_USER")).unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: self
                .var(&format!("{prefix}_PASSWORD"))
                .unwrap_or_else(|| DEFAULT_USER.to_string()),
        })
    }
}

// ============================================================================
// SECTION: Static Provider
// ============================================================================

/// Serves a fixed master key and credential table.
#[derive(Clone)]
pub struct StaticSecretProvider {
    /// Master key secret.
    master_key: String,
    /// Credentials keyed by shard.
    shards: BTreeMap<ShardId, DatabaseCredentials>,
}

impl fmt::Debug for StaticSecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSecretProvider")
            .field("master_key", &"<redacted>")
            .field("shards", &self.shards)
            .finish()
    }
}

impl StaticSecretProvider {
    /// Creates a provider with a master key and no shard credentials.
    #[must_use]
    pub fn new(master_key: impl Into<String>) -> Self {
        Self {
            master_key: master_key.into(),
            shards: BTreeMap::new(),
        }
    }

    /// Adds credentials for a shard.
    #[must_use]
    pub fn with_shard(mut self, shard_id: ShardId, credentials: DatabaseCredentials) -> Self {
        self.shards.insert(shard_id, credentials);
        self
    }

    /// Development secrets: two local Postgres shards on ports 5432 and 5433.
    #[must_use]
    pub fn development() -> Self {
        let shard = |index: u32, port: u16| DatabaseCredentials {
            host: DEFAULT_HOST.to_string(),
            port,
            database: format!("aurahealth_shard{index}"),
            username: DEFAULT_USER.to_string(),
            password: DEFAULT_USER.to_string(),
        };
        Self::new(DEV_MASTER_KEY)
            .with_shard(ShardId::new(0), shard(0, 5432))
            .with_shard(ShardId::new(1), shard(1, 5433))
    }
}

impl SecretProvider for StaticSecretProvider {
    fn master_encryption_key(&self) -> Result<String, SecretError> {
        Ok(self.master_key.clone())
    }

    fn database_credentials(&self, shard_id: ShardId) -> Result<DatabaseCredentials, SecretError> {
        self.shards
            .get(&shard_id)
            .cloned()
            .ok_or_else(|| SecretError::Missing(format!("credentials for shard {shard_id}")))
    }
}
