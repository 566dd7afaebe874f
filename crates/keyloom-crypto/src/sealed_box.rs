//! Anonymous public-key encryption (sealed boxes).
//!
//! A sealed box hides the sender entirely: a fresh ephemeral X25519 keypair
//! is generated per seal, so the ciphertext carries no sender identity. The
//! same primitive serves per-participant session-key fan-out and the
//! migration key exchange.
//!
//! Wire layout: `ephemeral_public (32) || ciphertext || tag (16)`. The nonce
//! is derived from the two public keys, so it never travels.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{CryptoError, KEY_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE, aead};

/// Bytes a sealed box adds on top of the message length.
pub const SEAL_OVERHEAD: usize = PUBLIC_KEY_SIZE + aead::TAG_SIZE;

/// Info label for the sealing key derivation.
const SEAL_INFO: &[u8] = b"keyloom/v1/sealed-box";

/// Seal a message to a recipient's public key.
///
/// The caller provides the ephemeral secret seed; production callers pass
/// cryptographically random bytes, tests pass fixed seeds.
///
/// # Errors
///
/// `CorruptKeyMaterial` if the recipient key is a low-order point (the DH
/// output would be all zeros and the box openable by anyone).
pub fn seal(
    message: &[u8],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
    ephemeral_seed: [u8; KEY_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral_secret = StaticSecret::from(ephemeral_seed);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let recipient = PublicKey::from(*recipient_public);

    let shared = ephemeral_secret.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::CorruptKeyMaterial {
            expected: PUBLIC_KEY_SIZE,
            actual: PUBLIC_KEY_SIZE,
        });
    }

    let mut key = seal_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient_public);
    let nonce = seal_nonce(ephemeral_public.as_bytes(), recipient_public);

    let ciphertext = aead::encrypt(message, &key, &nonce, b"");
    key.zeroize();

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed box with the recipient's keypair.
///
/// # Errors
///
/// - `TruncatedInput` if the buffer cannot contain the framing
/// - `DecryptionFailed` if the box was sealed to a different key or tampered
/// - `CorruptKeyMaterial` if the embedded ephemeral key is degenerate
pub fn open(
    sealed: &[u8],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
    recipient_secret: &[u8; KEY_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::TruncatedInput {
            expected: SEAL_OVERHEAD,
            actual: sealed.len(),
        });
    }

    let mut ephemeral_public = [0u8; PUBLIC_KEY_SIZE];
    ephemeral_public.copy_from_slice(&sealed[..PUBLIC_KEY_SIZE]);
    let ciphertext = &sealed[PUBLIC_KEY_SIZE..];

    let secret = StaticSecret::from(*recipient_secret);
    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral_public));
    if !shared.was_contributory() {
        return Err(CryptoError::CorruptKeyMaterial {
            expected: PUBLIC_KEY_SIZE,
            actual: PUBLIC_KEY_SIZE,
        });
    }

    let mut key = seal_key(shared.as_bytes(), &ephemeral_public, recipient_public);
    let nonce = seal_nonce(&ephemeral_public, recipient_public);

    let result = aead::decrypt(ciphertext, &nonce, &key, b"");
    key.zeroize();
    result
}

/// Derive the symmetric sealing key from the DH output and both public keys.
fn seal_key(
    shared: &[u8; KEY_SIZE],
    ephemeral_public: &[u8; PUBLIC_KEY_SIZE],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
) -> [u8; KEY_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(None, shared);

    let mut info = Vec::with_capacity(SEAL_INFO.len() + 2 * PUBLIC_KEY_SIZE);
    info.extend_from_slice(SEAL_INFO);
    info.extend_from_slice(ephemeral_public);
    info.extend_from_slice(recipient_public);

    let mut key = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(&info, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    key
}

/// Derive the nonce from both public keys, as in the classic sealed-box
/// construction. Unique per seal because the ephemeral key is fresh.
fn seal_nonce(
    ephemeral_public: &[u8; PUBLIC_KEY_SIZE],
    recipient_public: &[u8; PUBLIC_KEY_SIZE],
) -> [u8; NONCE_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);
    let digest = hasher.finalize();

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&digest[..NONCE_SIZE]);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient_keypair(fill: u8) -> ([u8; 32], [u8; 32]) {
        let secret = StaticSecret::from([fill; 32]);
        let public = PublicKey::from(&secret);
        (*public.as_bytes(), secret.to_bytes())
    }

    #[test]
    fn seal_open_roundtrip() {
        let (public, secret) = recipient_keypair(0x11);
        let message = b"session key material";

        let sealed = seal(message, &public, [0x22; 32]).unwrap();
        let opened = open(&sealed, &public, &secret).unwrap();

        assert_eq!(opened, message);
    }

    #[test]
    fn sealed_length_is_message_plus_overhead() {
        let (public, _) = recipient_keypair(0x11);
        let sealed = seal(b"abc", &public, [0x22; 32]).unwrap();
        assert_eq!(sealed.len(), 3 + SEAL_OVERHEAD);
    }

    #[test]
    fn wrong_recipient_key_fails() {
        let (public, _) = recipient_keypair(0x11);
        let (other_public, other_secret) = recipient_keypair(0x33);

        let sealed = seal(b"for someone else", &public, [0x22; 32]).unwrap();
        let result = open(&sealed, &other_public, &other_secret);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn tampered_box_fails() {
        let (public, secret) = recipient_keypair(0x11);
        let mut sealed = seal(b"payload", &public, [0x22; 32]).unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;

        assert!(open(&sealed, &public, &secret).is_err());
    }

    #[test]
    fn truncated_box_is_rejected() {
        let (public, secret) = recipient_keypair(0x11);
        let result = open(&[0u8; SEAL_OVERHEAD - 1], &public, &secret);
        assert!(matches!(result, Err(CryptoError::TruncatedInput { .. })));
    }

    #[test]
    fn different_seeds_produce_different_boxes() {
        let (public, _) = recipient_keypair(0x11);

        let sealed1 = seal(b"same message", &public, [0x01; 32]).unwrap();
        let sealed2 = seal(b"same message", &public, [0x02; 32]).unwrap();

        assert_ne!(sealed1, sealed2, "fresh ephemeral keys must differ");
    }

    #[test]
    fn low_order_recipient_is_rejected() {
        // The identity point: DH output is all zeros
        let zero_public = [0u8; 32];
        let result = seal(b"message", &zero_public, [0x22; 32]);
        assert!(matches!(result, Err(CryptoError::CorruptKeyMaterial { .. })));
    }

    #[test]
    fn empty_message_roundtrip() {
        let (public, secret) = recipient_keypair(0x55);
        let sealed = seal(b"", &public, [0x66; 32]).unwrap();
        assert_eq!(open(&sealed, &public, &secret).unwrap(), b"");
    }
}
