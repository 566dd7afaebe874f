//! Key derivation: Argon2id for passwords, HKDF-SHA256 for subkeys.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::{CryptoError, KEY_SIZE};

/// Domain separation prefix for HKDF info strings.
const INFO_PREFIX: &[u8] = b"keyloom/v1/";

/// Minimum salt length accepted by Argon2.
pub const MIN_SALT_SIZE: usize = 8;

/// Derive a 32-byte key from a password using Argon2id.
///
/// Memory-hard derivation for wrapping the identity secret and other
/// password-protected blobs at rest.
///
/// # Arguments
///
/// * `ops_cost` - number of passes (Argon2 t_cost)
/// * `mem_cost_kib` - memory in KiB (Argon2 m_cost)
///
/// # Errors
///
/// `KeyDerivation` if the parameters are out of the backend's accepted range
/// or the salt is shorter than [`MIN_SALT_SIZE`].
pub fn derive_key_from_password(
    password: &[u8],
    salt: &[u8],
    ops_cost: u32,
    mem_cost_kib: u32,
) -> Result<[u8; KEY_SIZE], CryptoError> {
    if salt.len() < MIN_SALT_SIZE {
        return Err(CryptoError::KeyDerivation {
            reason: format!("salt must be at least {MIN_SALT_SIZE} bytes, got {}", salt.len()),
        });
    }

    let params = Params::new(mem_cost_kib, ops_cost, 1, Some(KEY_SIZE))
        .map_err(|e| CryptoError::KeyDerivation { reason: e.to_string() })?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation { reason: e.to_string() })?;

    Ok(key)
}

/// Derive a labeled 32-byte subkey from input key material via HKDF-SHA256.
///
/// Labels are domain-separated under a crate-wide prefix; different labels
/// over the same material never collide. Used for the storage-at-rest key
/// (from the identity secret) and the migration transport key schedule.
pub fn derive_subkey(ikm: &[u8], label: &[u8]) -> [u8; KEY_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);

    let mut info = Vec::with_capacity(INFO_PREFIX.len() + label.len());
    info.extend_from_slice(INFO_PREFIX);
    info.extend_from_slice(label);

    let mut key = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    key
}

/// Derive a 32-byte root key from concatenated DH outputs.
///
/// Used by the session bootstrap to combine its DH results into an initial
/// root key; the salt binds the derivation to a protocol label.
pub fn derive_root_key(dh_outputs: &[u8], label: &[u8]) -> [u8; KEY_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(Some(label), dh_outputs);

    let mut info = Vec::with_capacity(INFO_PREFIX.len() + 4);
    info.extend_from_slice(INFO_PREFIX);
    info.extend_from_slice(b"root");

    let mut key = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    key
}
