//! Error types for cryptographic primitives.

use thiserror::Error;

/// Errors returned by the primitive layer.
///
/// A failed open never yields partial plaintext; every failure is total for
/// the buffer it was given.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD authentication failed (tampered or truncated ciphertext, or the
    /// wrong key).
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why authentication failed.
        reason: String,
    },

    /// Key bytes were malformed (wrong length or a degenerate public key).
    #[error("corrupt key material: expected {expected} bytes, got {actual}")]
    CorruptKeyMaterial {
        /// Expected encoded length.
        expected: usize,
        /// Actual encoded length.
        actual: usize,
    },

    /// Password-based key derivation was given unusable parameters.
    #[error("key derivation failed: {reason}")]
    KeyDerivation {
        /// Parameter or backend failure description.
        reason: String,
    },

    /// A sealed or encrypted buffer was too short to contain its framing.
    #[error("truncated input: need at least {expected} bytes, got {actual}")]
    TruncatedInput {
        /// Minimum length for the framing.
        expected: usize,
        /// Actual buffer length.
        actual: usize,
    },
}
