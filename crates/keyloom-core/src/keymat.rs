//! Tagged representations for key and content material.
//!
//! Every stored or transmitted key/content field carries an explicit variant
//! tag instead of being inferred from length or prefix conventions, and
//! "waiting for key" travels as a typed state instead of a sentinel string.

use serde::{Deserialize, Serialize};

use crate::error::RatchetError;

/// A key or content field with its handling state made explicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMaterial {
    /// Plaintext bytes, usable directly.
    Raw(Vec<u8>),
    /// Sealed to this device's public key; unseal before use.
    SealedForMe(Vec<u8>),
    /// The key for this material has not arrived yet.
    AwaitingKey,
}

impl KeyMaterial {
    /// Whether this material is usable without further key delivery.
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::AwaitingKey)
    }
}

/// Why a decryption is pending rather than failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingReason {
    /// No session or sender state exists yet for this conversation.
    AwaitingSessionKey,
}

/// Outcome of a decryption attempt, threaded through the call chain instead
/// of smuggled through the content field.
///
/// `Pending` is expected during eventually-consistent key delivery and maps
/// to an inline placeholder; `Failed` is fatal for the item it names and is
/// rendered as an inline error, never a global failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decryption<T> {
    /// Plaintext recovered.
    Ready(T),
    /// Key not yet available; show a waiting placeholder.
    Pending(PendingReason),
    /// Decryption failed for this item.
    Failed(RatchetError),
}

impl<T> Decryption<T> {
    /// The plaintext, if ready.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) | Self::Failed(_) => None,
        }
    }

    /// Whether the item is waiting on key delivery.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn awaiting_key_is_not_available() {
        assert!(!KeyMaterial::AwaitingKey.is_available());
        assert!(KeyMaterial::Raw(vec![1]).is_available());
        assert!(KeyMaterial::SealedForMe(vec![2]).is_available());
    }

    #[test]
    fn ready_extracts_value() {
        let d: Decryption<u32> = Decryption::Ready(7);
        assert_eq!(d.ready(), Some(7));

        let p: Decryption<u32> = Decryption::Pending(PendingReason::AwaitingSessionKey);
        assert!(p.is_pending());
        assert_eq!(p.ready(), None);
    }
}
