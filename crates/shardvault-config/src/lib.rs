// crates/shardvault-config/src/lib.rs
// ============================================================================
// Module: ShardVault Config Library
// Description: Configuration model, validation, and service bootstrap.
// Purpose: Single source of truth for shardvault.toml semantics.
// Dependencies: shardvault-core, shardvault-store, serde, toml
// ============================================================================

//! ## Overview
//! `shardvault-config` loads and validates `shardvault.toml` fail-closed and
//! turns a validated configuration into running [`Services`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod services;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use services::Services;
pub use services::ServicesError;
pub use services::load_key_manager;
