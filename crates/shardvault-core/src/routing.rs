// crates/shardvault-core/src/routing.rs
// ============================================================================
// Module: ShardVault Shard Routing
// Description: Deterministic tenant-to-shard mapping and consistency checks.
// Purpose: Guarantee records are read from the shard the routing function names.
// Dependencies: sha2
// ============================================================================

//! ## Overview
//! [`ShardRouter`] maps a tenant id to `SHA-256(id)[0..4] (big-endian) mod
//! num_shards`. The router is a pure function of `(tenant_id, num_shards)` and
//! holds no other state. `num_shards` is fixed at construction: changing it
//! after data exists is a resharding operation and invalidates every stored
//! `shard_id`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::num::NonZeroU32;

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::identifiers::ShardId;
use crate::identifiers::TenantId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default shard count for a deployment.
pub const DEFAULT_NUM_SHARDS: u32 = 2;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Shard routing errors.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Router was configured with zero shards.
    #[error("shard count must be greater than zero")]
    InvalidShardCount,
    /// Stored shard assignment disagrees with the routing function.
    #[error("shard mismatch for tenant {tenant}: expected shard {expected}, found {stored}")]
    ShardMismatch {
        /// Redacted tenant id.
        tenant: String,
        /// Shard the routing function names.
        expected: ShardId,
        /// Shard recorded on the row.
        stored: ShardId,
    },
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Deterministic, stateless mapping from tenant identity to shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShardRouter {
    /// Total number of shards.
    num_shards: NonZeroU32,
}

impl Default for ShardRouter {
    fn default() -> Self {
        Self {
            num_shards: NonZeroU32::new(DEFAULT_NUM_SHARDS).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl ShardRouter {
    /// Creates a router over `num_shards` shards.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidShardCount`] when `num_shards` is zero.
    pub fn new(num_shards: u32) -> Result<Self, RoutingError> {
        let num_shards = NonZeroU32::new(num_shards).ok_or(RoutingError::InvalidShardCount)?;
        Ok(Self {
            num_shards,
        })
    }

    /// Returns the configured shard count.
    #[must_use]
    pub const fn num_shards(&self) -> u32 {
        self.num_shards.get()
    }

    /// Returns every shard id this router can produce, in ascending order.
    pub fn shard_ids(&self) -> impl Iterator<Item = ShardId> {
        (0..self.num_shards.get()).map(ShardId::new)
    }

    /// Returns the shard that owns `tenant_id`.
    #[must_use]
    pub fn shard_id(&self, tenant_id: &TenantId) -> ShardId {
        let digest = Sha256::digest(tenant_id.as_bytes());
        let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        ShardId::new(prefix % self.num_shards.get())
    }

    /// Returns whether `stored` matches the routing function for `tenant_id`.
    #[must_use]
    pub fn validate_consistency(&self, tenant_id: &TenantId, stored: ShardId) -> bool {
        self.shard_id(tenant_id) == stored
    }

    /// Fails with [`RoutingError::ShardMismatch`] when `stored` is not the
    /// routed shard for `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::ShardMismatch`] on disagreement.
    pub fn ensure_consistent(
        &self,
        tenant_id: &TenantId,
        stored: ShardId,
    ) -> Result<(), RoutingError> {
        let expected = self.shard_id(tenant_id);
        if expected == stored {
            return Ok(());
        }
        Err(RoutingError::ShardMismatch {
            tenant: tenant_id.redacted(),
            expected,
            stored,
        })
    }

    /// Returns whether `shard_id` is inside this router's range.
    #[must_use]
    pub const fn contains(&self, shard_id: ShardId) -> bool {
        shard_id.get() < self.num_shards.get()
    }
}
