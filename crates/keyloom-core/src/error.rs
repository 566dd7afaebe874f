//! Error taxonomy for ratchet and key-agreement operations.
//!
//! Recoverability is part of the contract: `SessionMissing` means "ask for a
//! fresh key and show a placeholder", while `CorruptKeyMaterial` and
//! `DecryptionFailed` are fatal for the item they occurred on and must never
//! be silently skipped or retried with the same inputs.

use keyloom_crypto::CryptoError;
use thiserror::Error;

/// Errors from session and group ratchet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// No ratchet state exists locally for the conversation (or sender).
    /// Recoverable: request a fresh key and render a waiting placeholder.
    #[error("no session state for this conversation")]
    SessionMissing,

    /// Stored or transmitted key bytes were malformed. Fatal; usually
    /// indicates corruption elsewhere in the identity system.
    #[error("corrupt key material: {reason}")]
    CorruptKeyMaterial {
        /// What was malformed.
        reason: String,
    },

    /// AEAD authentication failed. Fatal for this item; never retried with
    /// the same inputs.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why authentication failed.
        reason: String,
    },

    /// An incoming counter is further ahead than the skip bound allows.
    #[error("message counter {requested} too far ahead of chain at {current} (max skip {max})")]
    TooFarAhead {
        /// Current chain position.
        current: u32,
        /// Counter the message claimed.
        requested: u32,
        /// Maximum permitted skip.
        max: u32,
    },

    /// An incoming counter is behind the chain and its skipped key was
    /// already consumed (or never cached). Replays land here.
    #[error("message counter {counter} already consumed")]
    DuplicateMessage {
        /// Counter of the rejected message.
        counter: u32,
    },

    /// The chain counter reached its maximum; the chain must be rotated.
    #[error("chain counter overflow at {current}")]
    CounterOverflow {
        /// The saturated counter value.
        current: u32,
    },
}

impl From<CryptoError> for RatchetError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed { reason } => Self::DecryptionFailed { reason },
            CryptoError::CorruptKeyMaterial { .. }
            | CryptoError::TruncatedInput { .. }
            | CryptoError::KeyDerivation { .. } => {
                Self::CorruptKeyMaterial { reason: err.to_string() }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_decryption_failure_maps_to_decryption_failed() {
        let err: RatchetError =
            CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }.into();
        assert!(matches!(err, RatchetError::DecryptionFailed { .. }));
    }

    #[test]
    fn crypto_truncation_maps_to_corrupt_material() {
        let err: RatchetError = CryptoError::TruncatedInput { expected: 16, actual: 3 }.into();
        assert!(matches!(err, RatchetError::CorruptKeyMaterial { .. }));
    }
}
