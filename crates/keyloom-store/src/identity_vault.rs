//! Password-wrapped identity keypair.
//!
//! The identity secret rests wrapped under an Argon2id-derived key. A
//! verifier digest allows password checks without attempting decryption;
//! the comparison is constant-time.

use keyloom_core::identity::IdentityKeyPair;
use keyloom_crypto::{CryptoError, aead, hash, kdf};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::StoreError;

/// Salt length for the password derivation.
pub const SALT_SIZE: usize = 16;

/// Default Argon2 passes.
pub const DEFAULT_OPS_COST: u32 = 3;

/// Default Argon2 memory, in KiB (64 MiB).
pub const DEFAULT_MEM_COST_KIB: u32 = 65536;

/// Label separating the verifier digest from the wrap key itself.
const VERIFIER_LABEL: &[u8] = b"identity-verifier";

/// Label for the storage-at-rest key derived from the identity secret.
const STORAGE_LABEL: &[u8] = b"storage-at-rest";

/// The identity keypair at rest, wrapped under a password.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityVault {
    /// Identity public key (not secret; also published to the directory).
    pub public: [u8; 32],
    salt: [u8; SALT_SIZE],
    ops_cost: u32,
    mem_cost_kib: u32,
    verifier: [u8; 32],
    nonce: [u8; 24],
    wrapped_secret: Vec<u8>,
}

impl IdentityVault {
    /// Wrap a fresh identity under a password.
    ///
    /// `identity_seed`, `salt`, and `nonce` are caller-provided random bytes.
    /// Returns the vault and the unlocked keypair so setup can continue
    /// without a second derivation.
    pub fn create(
        password: &[u8],
        identity_seed: [u8; 32],
        salt: [u8; SALT_SIZE],
        nonce: [u8; 24],
        ops_cost: u32,
        mem_cost_kib: u32,
    ) -> Result<(Self, IdentityKeyPair), StoreError> {
        let identity = IdentityKeyPair::from_seed(identity_seed);

        let mut wrap_key = derive_wrap_key(password, &salt, ops_cost, mem_cost_kib)?;
        let verifier = verifier_digest(&wrap_key);

        let mut secret = identity.secret_bytes();
        let wrapped_secret = aead::encrypt(&secret, &wrap_key, &nonce, b"identity");
        secret.zeroize();
        wrap_key.zeroize();

        let vault = Self {
            public: identity.public(),
            salt,
            ops_cost,
            mem_cost_kib,
            verifier,
            nonce,
            wrapped_secret,
        };

        Ok((vault, identity))
    }

    /// Check a password against the verifier without decrypting.
    ///
    /// # Errors
    ///
    /// `InvalidPassword` on mismatch. The comparison itself is
    /// constant-time.
    pub fn verify_password(&self, password: &[u8]) -> Result<(), StoreError> {
        let mut wrap_key =
            derive_wrap_key(password, &self.salt, self.ops_cost, self.mem_cost_kib)?;
        let candidate = verifier_digest(&wrap_key);
        wrap_key.zeroize();

        if hash::constant_time_eq(&candidate, &self.verifier) {
            Ok(())
        } else {
            Err(StoreError::InvalidPassword)
        }
    }

    /// Unlock the identity keypair with a password.
    pub fn unlock(&self, password: &[u8]) -> Result<IdentityKeyPair, StoreError> {
        let mut wrap_key =
            derive_wrap_key(password, &self.salt, self.ops_cost, self.mem_cost_kib)?;

        let candidate = verifier_digest(&wrap_key);
        if !hash::constant_time_eq(&candidate, &self.verifier) {
            wrap_key.zeroize();
            return Err(StoreError::InvalidPassword);
        }

        let result = aead::decrypt(&self.wrapped_secret, &self.nonce, &wrap_key, b"identity");
        wrap_key.zeroize();

        let mut secret_bytes = result.map_err(|e| StoreError::CorruptRow {
            reason: format!("identity secret failed to unwrap: {e}"),
        })?;

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&secret_bytes);
        secret_bytes.zeroize();

        let identity = IdentityKeyPair::from_seed(seed);
        seed.zeroize();
        Ok(identity)
    }
}

/// Derive the storage-at-rest key from an unlocked identity.
///
/// Every secret-bearing row in the persistent backend is sealed under this
/// key, so the store is unreadable without the identity secret.
pub fn storage_key_for(identity: &IdentityKeyPair) -> [u8; 32] {
    let mut secret = identity.secret_bytes();
    let key = kdf::derive_subkey(&secret, STORAGE_LABEL);
    secret.zeroize();
    key
}

fn derive_wrap_key(
    password: &[u8],
    salt: &[u8; SALT_SIZE],
    ops_cost: u32,
    mem_cost_kib: u32,
) -> Result<[u8; 32], StoreError> {
    kdf::derive_key_from_password(password, salt, ops_cost, mem_cost_kib).map_err(|e| match e {
        CryptoError::KeyDerivation { reason } => StoreError::Serialization(reason),
        other => StoreError::Serialization(other.to_string()),
    })
}

fn verifier_digest(wrap_key: &[u8; 32]) -> [u8; 32] {
    let labeled = kdf::derive_subkey(wrap_key, VERIFIER_LABEL);
    hash::digest(&labeled)
}
