//! Key derivation for the payload codec.
//!
//! Secrets are already high-entropy strings, so Argon2id is used for domain
//! separation with a fixed salt rather than for password stretching.

use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(feature = "aead")]
use crate::error::SecretError;

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

#[cfg(feature = "aead")]
const DOMAIN_SALT: &[u8; 16] = b"flag-resolver.v1";

/// Derived key material, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 4 * 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Derives the codec key from a secret.
#[cfg(feature = "aead")]
pub fn derive_key(secret: &str, params: &KdfParams) -> Result<DerivedKey, SecretError> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|err| {
        tracing::error!(error = %err, "invalid key derivation parameters");
        SecretError::KeyDerivation
    })?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(secret.as_bytes(), DOMAIN_SALT, &mut key_bytes)
        .map_err(|err| {
            tracing::error!(error = %err, "key derivation failed");
            SecretError::KeyDerivation
        })?;

    let key = DerivedKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}
