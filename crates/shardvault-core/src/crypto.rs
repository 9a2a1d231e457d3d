// crates/shardvault-core/src/crypto.rs
// ============================================================================
// Module: ShardVault Tenant Key Management
// Description: Per-tenant key derivation and AES-256-GCM field encryption.
// Purpose: Keep tenant data at rest authenticated and bound to tenant identity.
// Dependencies: aes-gcm, hkdf, pbkdf2, rand, sha2, zeroize
// ============================================================================

//! ## Overview
//! The [`KeyManager`] owns the process-wide master key and derives a fresh
//! tenant key for every encrypt/decrypt call using PBKDF2-HMAC-SHA-256 with
//! the tenant id as salt. Blobs are laid out as
//! `IV(12) || ciphertext || tag(16)`; an empty plaintext maps to an empty blob.
//!
//! Security posture: decryption never returns plaintext whose tag was not
//! verified. Derived keys are never cached and are zeroized on drop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use aes_gcm::Aes256Gcm;
use aes_gcm::KeyInit;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::identifiers::TenantId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length of the master key and every derived key in bytes.
pub const KEY_LEN: usize = 32;
/// Length of the random AES-GCM nonce prefixed to every blob.
pub const IV_LEN: usize = 12;
/// Length of the AES-GCM authentication tag suffixed to every blob.
pub const TAG_LEN: usize = 16;
/// PBKDF2 iteration count for tenant key derivation.
pub const PBKDF2_ROUNDS: u32 = 100_000;
/// HKDF salt used when stretching a non-32-byte master secret.
const MASTER_KEY_HKDF_SALT: &[u8] = b"shardvault/master-key/v1";
/// HKDF info label used when stretching a non-32-byte master secret.
const MASTER_KEY_HKDF_INFO: &[u8] = b"tenant-field-encryption";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by key management and field encryption.
///
/// `Integrity` and `Format` are never recoverable: callers must abort the
/// current operation rather than retry or fall back.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication tag verification failed (wrong tenant or tampered data).
    #[error("integrity check failed: {0}")]
    Integrity(String),
    /// Blob is structurally malformed.
    #[error("malformed encrypted blob: {0}")]
    Format(String),
    /// Master key secret was rejected by the configured normalization mode.
    #[error("invalid master key: {0}")]
    InvalidMasterKey(String),
    /// Cipher setup or the random source failed.
    #[error("cipher failure: {0}")]
    Cipher(String),
}

// ============================================================================
// SECTION: Master Key Normalization
// ============================================================================

/// How a master secret that is not exactly 32 bytes becomes a 32-byte key.
///
/// A secret of exactly 32 bytes is used verbatim in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterKeyMode {
    /// Reject any secret that is not exactly 32 bytes.
    Exact,
    /// Stretch the raw secret with HKDF-SHA-256.
    #[default]
    Hkdf,
    /// Legacy behavior: zero-pad short secrets, truncate long ones.
    ZeroPad,
}

impl MasterKeyMode {
    /// Returns a stable label for config and audit output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Hkdf => "hkdf",
            Self::ZeroPad => "zero_pad",
        }
    }
}

/// Record of what normalization was applied to the configured secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MasterKeyNormalization {
    /// Secret was exactly 32 bytes and used as-is.
    Verbatim,
    /// Secret was stretched through HKDF.
    Derived {
        /// Byte length of the configured secret.
        original_len: usize,
    },
    /// Secret was shorter than 32 bytes and zero-padded.
    Padded {
        /// Byte length of the configured secret.
        original_len: usize,
    },
    /// Secret was longer than 32 bytes and truncated.
    Truncated {
        /// Byte length of the configured secret.
        original_len: usize,
    },
}

impl MasterKeyNormalization {
    /// Returns true when the secret was weakened by padding or truncation.
    #[must_use]
    pub const fn is_lossy(self) -> bool {
        matches!(self, Self::Padded { .. } | Self::Truncated { .. })
    }
}

// ============================================================================
// SECTION: Keys
// ============================================================================

/// Ephemeral 32-byte tenant key; zeroized on drop.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for DerivedKey {}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Process-wide cryptographic boundary around tenant data at rest.
///
/// # Invariants
/// - The master key is exactly 32 bytes and never leaves this type.
/// - Every encrypt/decrypt call re-derives the tenant key.
pub struct KeyManager {
    /// Normalized master key.
    master_key: Zeroizing<[u8; KEY_LEN]>,
    /// Normalization that produced the master key.
    normalization: MasterKeyNormalization,
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("master_key", &"<redacted>")
            .field("normalization", &self.normalization)
            .finish()
    }
}

impl KeyManager {
    /// Builds a key manager from the configured master secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidMasterKey`] when the secret is empty or
    /// rejected by `mode`.
    pub fn new(master_secret: &str, mode: MasterKeyMode) -> Result<Self, CryptoError> {
        let raw = master_secret.as_bytes();
        if raw.is_empty() {
            return Err(CryptoError::InvalidMasterKey("master key secret is empty".to_string()));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        let normalization = if raw.len() == KEY_LEN {
            key.copy_from_slice(raw);
            MasterKeyNormalization::Verbatim
        } else {
            match mode {
                MasterKeyMode::Exact => {
                    return Err(CryptoError::InvalidMasterKey(format!(
                        "master key must be exactly {KEY_LEN} bytes, got {}",
                        raw.len()
                    )));
                }
                MasterKeyMode::Hkdf => {
                    let hk = Hkdf::<Sha256>::new(Some(MASTER_KEY_HKDF_SALT), raw);
                    hk.expand(MASTER_KEY_HKDF_INFO, &mut key[..])
                        .map_err(|err| CryptoError::Cipher(err.to_string()))?;
                    MasterKeyNormalization::Derived {
                        original_len: raw.len(),
                    }
                }
                MasterKeyMode::ZeroPad => {
                    let take = raw.len().min(KEY_LEN);
                    key[..take].copy_from_slice(&raw[..take]);
                    if raw.len() < KEY_LEN {
                        MasterKeyNormalization::Padded {
                            original_len: raw.len(),
                        }
                    } else {
                        MasterKeyNormalization::Truncated {
                            original_len: raw.len(),
                        }
                    }
                }
            }
        };
        Ok(Self {
            master_key: key,
            normalization,
        })
    }

    /// Returns how the configured secret was normalized.
    #[must_use]
    pub const fn normalization(&self) -> MasterKeyNormalization {
        self.normalization
    }

    /// Derives the tenant key with PBKDF2-HMAC-SHA-256.
    ///
    /// Deterministic for a given master key and tenant id.
    #[must_use]
    pub fn derive_key(&self, tenant_id: &TenantId) -> DerivedKey {
        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            &self.master_key[..],
            tenant_id.as_bytes(),
            PBKDF2_ROUNDS,
            &mut out[..],
        );
        DerivedKey(out)
    }

    /// Encrypts `plaintext` for `tenant_id`.
    ///
    /// Returns `IV || ciphertext || tag`, or an empty vector for empty input.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Cipher`] when the random source or cipher fails.
    pub fn encrypt(&self, plaintext: &str, tenant_id: &TenantId) -> Result<Vec<u8>, CryptoError> {
        if plaintext.is_empty() {
            return Ok(Vec::new());
        }
        let cipher = self.cipher_for(tenant_id)?;
        let mut iv = [0u8; IV_LEN];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|err| CryptoError::Cipher(format!("random source unavailable: {err}")))?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::Cipher("aes-256-gcm encryption failed".to_string()))?;
        let mut blob = Vec::with_capacity(IV_LEN + sealed.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Decrypts a blob produced by [`KeyManager::encrypt`] for `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Format`] for blobs too short to hold an IV and
    /// tag, [`CryptoError::Integrity`] when tag verification fails.
    pub fn decrypt(&self, blob: &[u8], tenant_id: &TenantId) -> Result<String, CryptoError> {
        if blob.is_empty() {
            return Ok(String::new());
        }
        if blob.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::Format(format!(
                "blob is {} bytes, minimum is {}",
                blob.len(),
                IV_LEN + TAG_LEN
            )));
        }
        let (iv, sealed) = blob.split_at(IV_LEN);
        let cipher = self.cipher_for(tenant_id)?;
        let plaintext = cipher.decrypt(Nonce::from_slice(iv), sealed).map_err(|_| {
            CryptoError::Integrity("authentication tag mismatch for tenant".to_string())
        })?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Format("decrypted payload is not utf-8".to_string()))
    }

    /// Builds an AES-256-GCM cipher keyed for the tenant.
    fn cipher_for(&self, tenant_id: &TenantId) -> Result<Aes256Gcm, CryptoError> {
        let key = self.derive_key(tenant_id);
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| CryptoError::Cipher("derived key has invalid length".to_string()))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
