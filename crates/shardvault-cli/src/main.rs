// crates/shardvault-cli/src/main.rs
// ============================================================================
// Module: ShardVault CLI Entry Point
// Description: Command dispatcher for routing, encryption, and shard status.
// Purpose: Provide an operator CLI over the ShardVault storage layer.
// Dependencies: clap, base64, shardvault-config, shardvault-core, serde_json.
// ============================================================================

//! ## Overview
//! The ShardVault CLI exposes the storage layer's small operator surface:
//! resolving a tenant's shard, encrypting and decrypting a value under a
//! tenant's derived key, reporting per-shard pool state, and validating a
//! configuration file. Secrets come from the configured provider and are
//! never echoed.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use shardvault_config::CONFIG_ENV_VAR;
use shardvault_config::Services;
use shardvault_config::ShardVaultConfig;
use shardvault_config::load_key_manager;
use shardvault_core::KeyManager;
use shardvault_core::ShardId;
use shardvault_core::ShardRouter;
use shardvault_core::TenantId;
use shardvault_store::ShardState;
use shardvault_store::ShardStatus;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "shardvault.toml";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "shardvault", disable_help_subcommand = true, version)]
struct Cli {
    /// Selected subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the shard that owns a tenant.
    Route(RouteCommand),
    /// Encrypt a value under a tenant's derived key (base64 output).
    Encrypt(EncryptCommand),
    /// Decrypt a base64 blob under a tenant's derived key.
    Decrypt(DecryptCommand),
    /// Register every shard and print per-shard status as JSON.
    Shards(ConfigArgs),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Shared configuration path argument.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Path to `shardvault.toml` (defaults to `SHARDVAULT_CONFIG`, then the
    /// working directory, then built-in defaults).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `route`.
#[derive(Args, Debug)]
struct RouteCommand {
    /// Tenant identifier.
    tenant: String,
    /// Shard count override; defaults to the configured count.
    #[arg(long, value_name = "N")]
    num_shards: Option<u32>,
    /// Configuration source.
    #[command(flatten)]
    config: ConfigArgs,
}

/// Arguments for `encrypt`.
#[derive(Args, Debug)]
struct EncryptCommand {
    /// Tenant identifier that scopes the key.
    #[arg(long)]
    tenant: String,
    /// Plaintext to encrypt.
    #[arg(long)]
    plaintext: String,
    /// Configuration source.
    #[command(flatten)]
    config: ConfigArgs,
}

/// Arguments for `decrypt`.
#[derive(Args, Debug)]
struct DecryptCommand {
    /// Tenant identifier that scopes the key.
    #[arg(long)]
    tenant: String,
    /// Base64-encoded blob produced by `encrypt`.
    #[arg(long)]
    blob: String,
    /// Configuration source.
    #[command(flatten)]
    config: ConfigArgs,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a ShardVault configuration file.
    Validate(ConfigArgs),
}

/// `route` output.
#[derive(Debug, Serialize)]
struct RouteOutput {
    /// Shard that owns the tenant.
    shard_id: ShardId,
    /// Shard count used for routing.
    num_shards: u32,
}

/// `shards` output.
#[derive(Debug, Serialize)]
struct ShardsOutput {
    /// Per-shard state and pool statistics.
    shards: Vec<ShardStatus>,
    /// Whether any shard serves from the in-memory store.
    degraded: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a message.
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Route(command) => command_route(&command),
        Commands::Encrypt(command) => command_encrypt(&command),
        Commands::Decrypt(command) => command_decrypt(&command),
        Commands::Shards(command) => command_shards(&command),
        Commands::Config {
            command,
        } => command_config(&command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes the `route` command.
fn command_route(command: &RouteCommand) -> CliResult<ExitCode> {
    let num_shards = match command.num_shards {
        Some(count) => count,
        None => resolve_config(command.config.config.as_deref())?.router.num_shards,
    };
    let output = route_tenant(&command.tenant, num_shards)?;
    write_json(&output)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `encrypt` command.
fn command_encrypt(command: &EncryptCommand) -> CliResult<ExitCode> {
    let keys = key_manager(command.config.config.as_deref())?;
    let blob = keys
        .encrypt(&command.plaintext, &TenantId::new(command.tenant.as_str()))
        .map_err(|err| CliError::new(format!("encryption failed: {err}")))?;
    write_stdout_line(&STANDARD.encode(blob))
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `decrypt` command.
fn command_decrypt(command: &DecryptCommand) -> CliResult<ExitCode> {
    let blob = decode_blob(&command.blob)?;
    let keys = key_manager(command.config.config.as_deref())?;
    let plaintext = keys
        .decrypt(&blob, &TenantId::new(command.tenant.as_str()))
        .map_err(|err| CliError::new(format!("decryption failed: {err}")))?;
    write_stdout_line(&plaintext).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `shards` command.
fn command_shards(command: &ConfigArgs) -> CliResult<ExitCode> {
    let config = resolve_config(command.config.as_deref())?;
    let services = Services::from_config(&config)
        .map_err(|err| CliError::new(format!("bootstrap failed: {err}")))?;
    let shards = services.status().map_err(|err| CliError::new(err.to_string()))?;
    let output = ShardsOutput {
        degraded: shards.iter().any(|shard| shard.state == ShardState::Mock),
        shards,
    };
    write_json(&output)?;
    services.shutdown().map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

/// Dispatches config subcommands.
fn command_config(command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => command_config_validate(command),
    }
}

/// Executes the config validation command.
fn command_config_validate(command: &ConfigArgs) -> CliResult<ExitCode> {
    let config = ShardVaultConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    write_stdout_line(&format!("config ok: {} shards", config.router.num_shards))
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves configuration from an explicit path, the environment, the
/// working directory, or built-in defaults, in that order.
fn resolve_config(path: Option<&Path>) -> CliResult<ShardVaultConfig> {
    let discoverable =
        std::env::var_os(CONFIG_ENV_VAR).is_some() || Path::new(DEFAULT_CONFIG_FILE).exists();
    if path.is_none() && !discoverable {
        return Ok(ShardVaultConfig::default());
    }
    ShardVaultConfig::load(path)
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Builds the key manager from the configured secret provider, auditing
/// master key normalization through the configured sink.
fn key_manager(path: Option<&Path>) -> CliResult<KeyManager> {
    let config = resolve_config(path)?;
    let audit = config
        .audit
        .build_sink()
        .map_err(|err| CliError::new(format!("audit sink unavailable: {err}")))?;
    let secrets = config.secrets.provider();
    load_key_manager(&config, secrets.as_ref(), audit.as_ref())
        .map_err(|err| CliError::new(format!("master key unusable: {err}")))
}

/// Routes a tenant across `num_shards` shards.
fn route_tenant(tenant: &str, num_shards: u32) -> CliResult<RouteOutput> {
    let router = ShardRouter::new(num_shards).map_err(|err| CliError::new(err.to_string()))?;
    Ok(RouteOutput {
        shard_id: router.shard_id(&TenantId::new(tenant)),
        num_shards: router.num_shards(),
    })
}

/// Decodes a base64 blob argument.
fn decode_blob(encoded: &str) -> CliResult<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|err| CliError::new(format!("blob is not valid base64: {err}")))
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a value as pretty JSON to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render json: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
