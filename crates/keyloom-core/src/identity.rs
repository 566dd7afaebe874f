//! Device identity and one-time pre-keys.
//!
//! The identity keypair is the long-lived root of trust for a device; it
//! never leaves the device unencrypted. One-time pre-keys are consumable
//! X25519 keypair halves published in batches: each bootstraps at most one
//! session, and a consumed id is never reused.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::{PreKeyId, error::RatchetError};

/// Encoded length of an X25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Long-lived asymmetric keypair identifying a device.
///
/// The secret half is zeroized on drop (via `StaticSecret`) and is exposed
/// only through [`secret_bytes`](Self::secret_bytes) for encrypted-at-rest
/// persistence.
#[derive(Clone)]
pub struct IdentityKeyPair {
    secret: StaticSecret,
}

impl IdentityKeyPair {
    /// Create an identity from caller-provided random seed bytes.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { secret: StaticSecret::from(seed) }
    }

    /// Public half, as published to the identity directory.
    pub fn public(&self) -> [u8; PUBLIC_KEY_LEN] {
        *PublicKey::from(&self.secret).as_bytes()
    }

    /// Secret half. Only for sealing into the key store; never transmitted.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Diffie-Hellman with a peer public key.
    ///
    /// # Errors
    ///
    /// `CorruptKeyMaterial` if the peer key is a low-order point.
    pub(crate) fn diffie_hellman(
        &self,
        peer: &[u8; PUBLIC_KEY_LEN],
    ) -> Result<[u8; 32], RatchetError> {
        contributory_dh(&self.secret, peer)
    }
}

/// Consumable keypair half used once for session bootstrap.
///
/// Consumed by value in [`crate::session::bootstrap::respond`]; the type
/// system enforces single use within a process, the store enforces it across
/// restarts by deleting the row.
pub struct OneTimePreKey {
    id: PreKeyId,
    secret: StaticSecret,
}

impl OneTimePreKey {
    /// Create a pre-key from caller-provided random seed bytes.
    pub fn from_seed(id: PreKeyId, seed: [u8; 32]) -> Self {
        Self { id, secret: StaticSecret::from(seed) }
    }

    /// This pre-key's id.
    pub fn id(&self) -> PreKeyId {
        self.id
    }

    /// Public half, for inclusion in a published batch.
    pub fn public(&self) -> [u8; PUBLIC_KEY_LEN] {
        *PublicKey::from(&self.secret).as_bytes()
    }

    /// Secret half. Only for sealing into the key store.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub(crate) fn diffie_hellman(
        &self,
        peer: &[u8; PUBLIC_KEY_LEN],
    ) -> Result<[u8; 32], RatchetError> {
        contributory_dh(&self.secret, peer)
    }
}

/// Short-lived X25519 keypair for one protocol exchange.
///
/// Used by the migration receiver: generated per transfer, advertised out of
/// band, and discarded (zeroized) when the transfer ends.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
}

impl EphemeralKeyPair {
    /// Create an ephemeral keypair from caller-provided random seed bytes.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { secret: StaticSecret::from(seed) }
    }

    /// Public half, for out-of-band advertisement.
    pub fn public(&self) -> [u8; PUBLIC_KEY_LEN] {
        *PublicKey::from(&self.secret).as_bytes()
    }

    /// Secret half, for opening boxes sealed to this keypair.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

/// A peer's published keys, fetched from the identity directory.
///
/// Directory responses are untrusted; construct through
/// [`parse_public_key`] so malformed encodings fail before use.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PreKeyBundle {
    /// Peer's identity public key.
    pub identity_public: [u8; PUBLIC_KEY_LEN],
    /// Id of the one-time pre-key in this bundle.
    pub prekey_id: PreKeyId,
    /// Public half of the one-time pre-key.
    pub prekey_public: [u8; PUBLIC_KEY_LEN],
}

/// Validate an untrusted encoded public key.
///
/// # Errors
///
/// `CorruptKeyMaterial` if the encoding is not exactly 32 bytes. A malformed
/// key is a hard failure, never a skip: it usually indicates corruption
/// elsewhere in the identity system.
pub fn parse_public_key(bytes: &[u8]) -> Result<[u8; PUBLIC_KEY_LEN], RatchetError> {
    let array: [u8; PUBLIC_KEY_LEN] =
        bytes.try_into().map_err(|_| RatchetError::CorruptKeyMaterial {
            reason: format!("public key must be {PUBLIC_KEY_LEN} bytes, got {}", bytes.len()),
        })?;
    Ok(array)
}

fn contributory_dh(
    secret: &StaticSecret,
    peer: &[u8; PUBLIC_KEY_LEN],
) -> Result<[u8; 32], RatchetError> {
    let shared = secret.diffie_hellman(&PublicKey::from(*peer));
    if !shared.was_contributory() {
        return Err(RatchetError::CorruptKeyMaterial {
            reason: "peer public key is a low-order point".to_string(),
        });
    }
    Ok(*shared.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_public_is_stable() {
        let identity = IdentityKeyPair::from_seed([1u8; 32]);
        assert_eq!(identity.public(), identity.public());
    }

    #[test]
    fn identity_roundtrips_through_secret_bytes() {
        let identity = IdentityKeyPair::from_seed([2u8; 32]);
        let restored = IdentityKeyPair::from_seed(identity.secret_bytes());
        assert_eq!(identity.public(), restored.public());
    }

    #[test]
    fn dh_is_symmetric() {
        let a = IdentityKeyPair::from_seed([3u8; 32]);
        let b = IdentityKeyPair::from_seed([4u8; 32]);

        let ab = a.diffie_hellman(&b.public()).unwrap();
        let ba = b.diffie_hellman(&a.public()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn low_order_peer_is_rejected() {
        let a = IdentityKeyPair::from_seed([5u8; 32]);
        let result = a.diffie_hellman(&[0u8; 32]);
        assert!(matches!(result, Err(RatchetError::CorruptKeyMaterial { .. })));
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(parse_public_key(&[0u8; 31]).is_err());
        assert!(parse_public_key(&[0u8; 33]).is_err());
        assert!(parse_public_key(&[7u8; 32]).is_ok());
    }

    #[test]
    fn prekey_keeps_its_id() {
        let prekey = OneTimePreKey::from_seed(42, [6u8; 32]);
        assert_eq!(prekey.id(), 42);
    }
}
