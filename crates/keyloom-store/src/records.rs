//! Stored record types that are not ratchet state machines.

use keyloom_core::{
    ConversationId, PreKeyId, SessionId, UserId, identity::OneTimePreKey, keymat::KeyMaterial,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A one-time pre-key at rest.
///
/// Deleted the moment it is consumed by a bootstrap; the id is never reused
/// and the next published batch starts above the highest stored id.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredPreKey {
    /// Pre-key id. Monotonically increasing across the store's lifetime.
    pub id: PreKeyId,
    /// Public half, as published.
    pub public: [u8; 32],
    /// Secret half.
    pub secret: [u8; 32],
}

impl StoredPreKey {
    /// Capture a pre-key for persistence.
    pub fn from_prekey(prekey: &OneTimePreKey) -> Self {
        Self { id: prekey.id(), public: prekey.public(), secret: prekey.secret_bytes() }
    }

    /// Reconstruct the consumable pre-key.
    pub fn to_prekey(&self) -> OneTimePreKey {
        OneTimePreKey::from_seed(self.id, self.secret)
    }
}

impl Drop for StoredPreKey {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// An opaque, asymmetrically sealed copy of a freshly minted session key.
///
/// One row per participant of a distribution event; all rows of one event
/// share a `session_id`. The key travels as tagged [`KeyMaterial`], never
/// inferred from length or encoding: on the wire and server-side it is
/// always `SealedForMe`, opening only under the named user's identity
/// secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyRecord {
    /// Distribution event this record belongs to.
    pub session_id: SessionId,
    /// Participant this copy is sealed for.
    pub user_id: UserId,
    /// Conversation the key is for.
    pub conversation_id: ConversationId,
    /// The key material, explicitly tagged with its handling state.
    pub sealed_key: KeyMaterial,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_prekey_roundtrips() {
        let prekey = OneTimePreKey::from_seed(9, [0x31; 32]);
        let stored = StoredPreKey::from_prekey(&prekey);
        let restored = stored.to_prekey();

        assert_eq!(restored.id(), 9);
        assert_eq!(restored.public(), prekey.public());
    }
}
