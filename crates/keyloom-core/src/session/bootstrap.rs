//! X3DH-style session bootstrap.
//!
//! An asynchronous key agreement: the initiator combines its identity key
//! and a fresh ephemeral key against the responder's published identity and
//! one-time pre-key, so a shared root exists before the responder is online.
//!
//! # Forward secrecy of the bootstrap
//!
//! The pre-key is consumed by value and must be deleted from the store in
//! the same operation: a later compromise of pre-key material cannot decrypt
//! ratchet steps already taken, and a key can bootstrap at most one session.

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{
    PreKeyId,
    error::RatchetError,
    identity::{IdentityKeyPair, OneTimePreKey, PUBLIC_KEY_LEN, PreKeyBundle},
};

/// Salt label binding root derivation to this protocol.
const BOOTSTRAP_LABEL: &[u8] = b"keyloom/v1/bootstrap";

/// Session-bootstrap header attached to the first message of a session.
///
/// Cached as a pending header when a session is created before any message
/// has been sent; deleted once attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapHeader {
    /// Initiator's identity public key.
    pub initiator_identity: [u8; PUBLIC_KEY_LEN],
    /// Ephemeral public key used for this agreement only.
    pub ephemeral_public: [u8; PUBLIC_KEY_LEN],
    /// Which of the responder's one-time pre-keys was consumed.
    pub prekey_id: PreKeyId,
}

/// Initiate a session against a peer's published bundle.
///
/// Returns the shared root key and the header the responder needs to mirror
/// the agreement. The ephemeral seed must be fresh random bytes.
///
/// # Errors
///
/// `CorruptKeyMaterial` if any key in the bundle is degenerate.
pub fn initiate(
    identity: &IdentityKeyPair,
    peer: &PreKeyBundle,
    ephemeral_seed: [u8; 32],
) -> Result<([u8; 32], BootstrapHeader), RatchetError> {
    let ephemeral_secret = StaticSecret::from(ephemeral_seed);
    let ephemeral_public = *PublicKey::from(&ephemeral_secret).as_bytes();

    // DH1 = DH(IK_A, IK_B), DH2 = DH(EK_A, IK_B), DH3 = DH(EK_A, OPK_B)
    let dh1 = identity.diffie_hellman(&peer.identity_public)?;
    let dh2 = contributory(&ephemeral_secret, &peer.identity_public)?;
    let dh3 = contributory(&ephemeral_secret, &peer.prekey_public)?;

    let root = combine(&dh1, &dh2, &dh3);

    let header = BootstrapHeader {
        initiator_identity: identity.public(),
        ephemeral_public,
        prekey_id: peer.prekey_id,
    };

    Ok((root, header))
}

/// Mirror the agreement on the responder side, consuming the pre-key.
///
/// The caller must delete the pre-key's stored row as part of the same
/// operation; `respond` taking it by value enforces single use in-process.
///
/// # Errors
///
/// `CorruptKeyMaterial` if the header carries degenerate keys.
pub fn respond(
    identity: &IdentityKeyPair,
    prekey: OneTimePreKey,
    header: &BootstrapHeader,
) -> Result<[u8; 32], RatchetError> {
    // Mirrored: DH1 = DH(IK_B, IK_A), DH2 = DH(IK_B, EK_A), DH3 = DH(OPK_B, EK_A)
    let dh1 = identity.diffie_hellman(&header.initiator_identity)?;
    let dh2 = identity.diffie_hellman(&header.ephemeral_public)?;
    let dh3 = prekey.diffie_hellman(&header.ephemeral_public)?;

    Ok(combine(&dh1, &dh2, &dh3))
}

fn contributory(
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

fn combine(dh1: &[u8; 32], dh2: &[u8; 32], dh3: &[u8; 32]) -> [u8; 32] {
    let mut material = Vec::with_capacity(96);
    material.extend_from_slice(dh1);
    material.extend_from_slice(dh2);
    material.extend_from_slice(dh3);
    keyloom_crypto::kdf::derive_root_key(&material, BOOTSTRAP_LABEL)
}
