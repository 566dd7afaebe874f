//! Complete, ordered snapshot of every store section.
//!
//! Exists only for the duration of one migration: serialized, encrypted,
//! chunked over the relay, then imported on the new device and dropped.

use keyloom_core::{
    ConversationId, MessageId,
    group::{GroupReceiverState, GroupSenderState},
    session::{BootstrapHeader, PairSession},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::StoreError,
    identity_vault::IdentityVault,
    records::{SessionKeyRecord, StoredPreKey},
};

/// Snapshot of every store section.
///
/// Sections are sorted by their primary key on export, so two exports of
/// identical store contents are byte-identical once serialized.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct VaultExport {
    /// The password-wrapped identity, if one exists.
    pub identity: Option<IdentityVault>,
    /// One-time pre-keys, sorted by id.
    pub prekeys: Vec<StoredPreKey>,
    /// 1:1 ratchet states, sorted by conversation.
    pub pair_sessions: Vec<PairSession>,
    /// Group sender chains, sorted by conversation.
    pub group_senders: Vec<GroupSenderState>,
    /// Group receiver chains, sorted by (conversation, sender).
    pub group_receivers: Vec<GroupReceiverState>,
    /// Cached session key records, sorted by (session, user).
    pub session_key_records: Vec<SessionKeyRecord>,
    /// Pending bootstrap headers, sorted by conversation.
    pub pending_headers: Vec<(ConversationId, BootstrapHeader)>,
    /// Retained message keys, sorted by message id.
    pub message_keys: Vec<(MessageId, [u8; 32])>,
}

impl VaultExport {
    /// Serialize the snapshot for encryption and transfer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(bytes)
    }

    /// Parse a decrypted snapshot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        ciborium::de::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Whether every section is empty.
    pub fn is_empty(&self) -> bool {
        self.identity.is_none()
            && self.prekeys.is_empty()
            && self.pair_sessions.is_empty()
            && self.group_senders.is_empty()
            && self.group_receivers.is_empty()
            && self.session_key_records.is_empty()
            && self.pending_headers.is_empty()
            && self.message_keys.is_empty()
    }

    /// Total row count across all sections.
    pub fn row_count(&self) -> usize {
        usize::from(self.identity.is_some())
            + self.prekeys.len()
            + self.pair_sessions.len()
            + self.group_senders.len()
            + self.group_receivers.len()
            + self.session_key_records.len()
            + self.pending_headers.len()
            + self.message_keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_vault_roundtrips() {
        let vault = VaultExport::default();
        assert!(vault.is_empty());

        let bytes = vault.to_bytes().unwrap();
        let restored = VaultExport::from_bytes(&bytes).unwrap();
        assert!(restored.is_empty());
        assert_eq!(restored.row_count(), 0);
    }

    #[test]
    fn identical_contents_serialize_identically() {
        let mut a = VaultExport::default();
        let mut b = VaultExport::default();
        a.message_keys.push((5, [1u8; 32]));
        b.message_keys.push((5, [1u8; 32]));

        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert!(VaultExport::from_bytes(&[0xFF, 0x00, 0x13]).is_err());
    }
}
