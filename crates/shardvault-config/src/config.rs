// crates/shardvault-config/src/config.rs
// ============================================================================
// Module: ShardVault Configuration
// Description: Configuration loading and validation for ShardVault.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: shardvault-core, shardvault-store, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Unknown keys, out-of-range pool settings, and incomplete audit settings
//! are rejected before any shard is contacted. Secrets never appear in the
//! file; only the provider that supplies them is selected here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use shardvault_core::AuditSink;
use shardvault_core::DatabaseCredentials;
use shardvault_core::EnvSecretProvider;
use shardvault_core::FileAuditSink;
use shardvault_core::MasterKeyMode;
use shardvault_core::NoopAuditSink;
use shardvault_core::SecretError;
use shardvault_core::SecretProvider;
use shardvault_core::StaticSecretProvider;
use shardvault_core::StderrAuditSink;
use shardvault_store::ConnectionParams;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "shardvault.toml";
/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "SHARDVAULT_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of shards.
pub(crate) const MAX_NUM_SHARDS: u32 = 1024;
/// Maximum connections per shard pool.
pub(crate) const MAX_POOL_CONNECTIONS: u32 = 256;
/// Maximum connect and acquire timeout in milliseconds.
pub(crate) const MAX_CONNECT_TIMEOUT_MS: u64 = 60_000;
/// Maximum statement timeout in milliseconds.
pub(crate) const MAX_STATEMENT_TIMEOUT_MS: u64 = 600_000;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Root ShardVault configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardVaultConfig {
    /// Shard routing configuration.
    #[serde(default)]
    pub router: RouterConfig,
    /// Master key handling.
    #[serde(default)]
    pub crypto: CryptoConfig,
    /// Secret provider selection.
    #[serde(default)]
    pub secrets: SecretsConfig,
    /// Shard storage and pool configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl ShardVaultConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution order: explicit `path`, then [`CONFIG_ENV_VAR`], then
    /// `shardvault.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;
        self.storage.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

/// Shard routing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Number of shards tenants are routed across.
    #[serde(default = "default_num_shards")]
    pub num_shards: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            num_shards: default_num_shards(),
        }
    }
}

impl RouterConfig {
    /// Validates routing configuration.
    fn validate(self) -> Result<(), ConfigError> {
        if self.num_shards == 0 || self.num_shards > MAX_NUM_SHARDS {
            return Err(ConfigError::Invalid(format!(
                "router.num_shards must be between 1 and {MAX_NUM_SHARDS}"
            )));
        }
        Ok(())
    }
}

/// Master key handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CryptoConfig {
    /// How a master secret that is not exactly 32 bytes is handled.
    #[serde(default)]
    pub master_key_mode: MasterKeyMode,
}

/// Secret provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsConfig {
    /// Provider for the master key and shard credentials.
    #[serde(default)]
    pub source: SecretSource,
}

impl SecretsConfig {
    /// Builds the configured secret provider.
    #[must_use]
    pub fn provider(self) -> Arc<dyn SecretProvider> {
        match self.source {
            SecretSource::Env => Arc::new(EnvSecretProvider::new()),
            SecretSource::StaticDev => Arc::new(StaticSecretProvider::development()),
        }
    }
}

/// Secret provider source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    /// Process environment variables.
    #[default]
    Env,
    /// Built-in development secrets.
    StaticDev,
}

/// Shard storage configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Storage backend for every shard.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Connections kept open per shard pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Upper bound on connections per shard pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Maximum wait for a pooled connection in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Server-side statement timeout in milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl StorageConfig {
    /// Validates pool bounds and timeouts.
    fn validate(self) -> Result<(), ConfigError> {
        if self.max_connections == 0 || self.max_connections > MAX_POOL_CONNECTIONS {
            return Err(ConfigError::Invalid(format!(
                "storage.max_connections must be between 1 and {MAX_POOL_CONNECTIONS}"
            )));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::Invalid(
                "storage.min_connections must not exceed storage.max_connections".to_string(),
            ));
        }
        validate_timeout(
            "storage.connect_timeout_ms",
            self.connect_timeout_ms,
            MAX_CONNECT_TIMEOUT_MS,
        )?;
        validate_timeout(
            "storage.acquire_timeout_ms",
            self.acquire_timeout_ms,
            MAX_CONNECT_TIMEOUT_MS,
        )?;
        validate_timeout(
            "storage.statement_timeout_ms",
            self.statement_timeout_ms,
            MAX_STATEMENT_TIMEOUT_MS,
        )?;
        Ok(())
    }

    /// Returns connection parameters for one shard's credentials.
    #[must_use]
    pub fn connection_params(&self, credentials: DatabaseCredentials) -> ConnectionParams {
        ConnectionParams {
            credentials,
            connect_timeout_ms: self.connect_timeout_ms,
            acquire_timeout_ms: self.acquire_timeout_ms,
            statement_timeout_ms: self.statement_timeout_ms,
        }
    }
}

/// Shard storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Postgres pools, degrading per shard to the in-memory store.
    #[default]
    Postgres,
    /// In-memory store for every shard, no connection attempts.
    Memory,
}

/// Audit sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Sink type.
    #[serde(default)]
    pub sink: AuditSinkType,
    /// Log file path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.sink {
            AuditSinkType::File => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("file audit sink requires audit.path".to_string())
                })?;
                validate_path_string("audit.path", &path.to_string_lossy())
            }
            AuditSinkType::Stderr | AuditSinkType::None => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "audit.path is only valid with sink = \"file\"".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Builds the configured audit sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the audit file cannot be opened.
    pub fn build_sink(&self) -> Result<Arc<dyn AuditSink>, ConfigError> {
        match (self.sink, self.path.as_ref()) {
            (AuditSinkType::File, Some(path)) => {
                let sink =
                    FileAuditSink::new(path).map_err(|err| ConfigError::Io(err.to_string()))?;
                Ok(Arc::new(sink))
            }
            (AuditSinkType::File, None) => {
                Err(ConfigError::Invalid("file audit sink requires audit.path".to_string()))
            }
            (AuditSinkType::Stderr, _) => Ok(Arc::new(StderrAuditSink)),
            (AuditSinkType::None, _) => Ok(Arc::new(NoopAuditSink)),
        }
    }
}

/// Audit sink type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkType {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard events.
    None,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Secret provider could not supply a required value.
    #[error("config secrets error: {0}")]
    Secrets(#[from] SecretError),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a timeout is non-zero and within `max`.
fn validate_timeout(field: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::Invalid(format!("{field} must be between 1 and {max}")));
    }
    Ok(())
}

/// Default shard count.
const fn default_num_shards() -> u32 {
    2
}

/// Default minimum pool size.
const fn default_min_connections() -> u32 {
    2
}

/// Default maximum pool size.
const fn default_max_connections() -> u32 {
    10
}

/// Default connect timeout.
const fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Default acquire timeout.
const fn default_acquire_timeout_ms() -> u64 {
    5_000
}

/// Default statement timeout.
const fn default_statement_timeout_ms() -> u64 {
    30_000
}

// ============================================================================
// SECTION: Tests
// ============================================================================
