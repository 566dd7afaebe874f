//! Authenticated symmetric encryption using `XChaCha20-Poly1305`.
//!
//! All functions are pure - random nonce bytes must be provided by the
//! caller. This enables deterministic testing.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{CryptoError, KEY_SIZE, NONCE_SIZE};

/// Poly1305 tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt a buffer under a 32-byte key and caller-provided 24-byte nonce.
///
/// Returns ciphertext with the 16-byte Poly1305 tag appended.
///
/// # Security
///
/// - The nonce MUST be unique per (key, message); callers provide
///   cryptographically random bytes in production
/// - Associated data is bound into the tag and must match on open
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    associated_data: &[u8],
) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let payload = Payload { msg: plaintext, aad: associated_data };

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    ciphertext
}

/// Decrypt and authenticate a buffer produced by [`encrypt`].
///
/// # Errors
///
/// - `DecryptionFailed` if the tag does not verify (tampering, truncation,
///   wrong key, or wrong associated data)
/// - `TruncatedInput` if the buffer is shorter than a bare tag
pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; KEY_SIZE],
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::TruncatedInput { expected: TAG_SIZE, actual: ciphertext.len() });
    }

    let cipher = XChaCha20Poly1305::new(key.into());
    let payload = Payload { msg: ciphertext, aad: associated_data };

    cipher.decrypt(XNonce::from_slice(nonce), payload).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}
