//! The key store contract.

use async_trait::async_trait;
use keyloom_core::{
    ConversationId, MessageId, PreKeyId, SessionId, UserId,
    group::{GroupReceiverState, GroupSenderState},
    session::{BootstrapHeader, PairSession},
};

use crate::{
    error::StoreError,
    identity_vault::IdentityVault,
    records::{SessionKeyRecord, StoredPreKey},
    vault::VaultExport,
};

/// Handle scoping every store operation to a resolved identity.
///
/// The only way to obtain one is through [`for_identity`](Self::for_identity)
/// with an authenticated identity id; with `None` the constructor fails
/// closed instead of silently selecting a default store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreHandle {
    identity: UserId,
}

impl StoreHandle {
    /// Resolve a handle from an authentication result.
    ///
    /// # Errors
    ///
    /// `NoIdentity` when no identity is authenticated.
    pub fn for_identity(identity: Option<UserId>) -> Result<Self, StoreError> {
        identity.map(|identity| Self { identity }).ok_or(StoreError::NoIdentity)
    }

    /// The identity this handle is scoped to.
    pub fn identity(&self) -> UserId {
        self.identity
    }
}

/// Per-identity repository of all cryptographic material.
///
/// All operations are asynchronous and scoped to the handle the store was
/// opened with. Writes, once started, run to completion: callers must not
/// abort an in-flight store write, since partial writes could corrupt
/// ratchet state.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Store the identity vault, replacing any existing one.
    async fn put_identity(&self, vault: &IdentityVault) -> Result<(), StoreError>;

    /// Load the identity vault.
    async fn identity(&self) -> Result<Option<IdentityVault>, StoreError>;

    /// Store a one-time pre-key.
    async fn put_prekey(&self, prekey: &StoredPreKey) -> Result<(), StoreError>;

    /// Load a one-time pre-key by id. `None` once consumed.
    async fn prekey(&self, id: PreKeyId) -> Result<Option<StoredPreKey>, StoreError>;

    /// Delete a consumed pre-key. Its id is never reused.
    async fn delete_prekey(&self, id: PreKeyId) -> Result<(), StoreError>;

    /// Highest pre-key id currently stored, for generating the next batch
    /// above it. `None` when no pre-keys are stored.
    async fn highest_prekey_id(&self) -> Result<Option<PreKeyId>, StoreError>;

    /// Store 1:1 ratchet state, overwriting the previous step.
    async fn put_pair_session(&self, session: &PairSession) -> Result<(), StoreError>;

    /// Load 1:1 ratchet state for a conversation.
    async fn pair_session(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<PairSession>, StoreError>;

    /// Delete 1:1 ratchet state (session reset).
    async fn delete_pair_session(&self, conversation: ConversationId) -> Result<(), StoreError>;

    /// Store this device's group sender chain. Exactly one per conversation.
    async fn put_group_sender(&self, state: &GroupSenderState) -> Result<(), StoreError>;

    /// Load the group sender chain for a conversation.
    async fn group_sender(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<GroupSenderState>, StoreError>;

    /// Drop the sender chain without touching peer receiver states.
    async fn delete_group_sender(&self, conversation: ConversationId) -> Result<(), StoreError>;

    /// Store a receiver chain for one (conversation, sender) pair.
    async fn put_group_receiver(&self, state: &GroupReceiverState) -> Result<(), StoreError>;

    /// Load the receiver chain for a member of a conversation.
    async fn group_receiver(
        &self,
        conversation: ConversationId,
        sender: UserId,
    ) -> Result<Option<GroupReceiverState>, StoreError>;

    /// Delete one member's receiver chain.
    async fn delete_group_receiver(
        &self,
        conversation: ConversationId,
        sender: UserId,
    ) -> Result<(), StoreError>;

    /// Store a batch of session key records atomically: either every record
    /// is persisted or none are.
    async fn put_session_key_records(
        &self,
        records: &[SessionKeyRecord],
    ) -> Result<(), StoreError>;

    /// Load a session key record by (session, user).
    async fn session_key_record(
        &self,
        session: SessionId,
        user: UserId,
    ) -> Result<Option<SessionKeyRecord>, StoreError>;

    /// Cache a bootstrap header until the first message attaches it.
    async fn put_pending_header(
        &self,
        conversation: ConversationId,
        header: &BootstrapHeader,
    ) -> Result<(), StoreError>;

    /// Remove and return the pending header for a conversation, if any.
    async fn take_pending_header(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<BootstrapHeader>, StoreError>;

    /// Retain a per-message key for history re-decryption.
    async fn put_message_key(&self, message: MessageId, key: [u8; 32]) -> Result<(), StoreError>;

    /// Load a retained message key.
    async fn message_key(&self, message: MessageId) -> Result<Option<[u8; 32]>, StoreError>;

    /// Delete a retained message key.
    async fn delete_message_key(&self, message: MessageId) -> Result<(), StoreError>;

    /// Snapshot every section in a deterministic order.
    async fn export_all(&self) -> Result<VaultExport, StoreError>;

    /// Replace the store's contents with a snapshot.
    ///
    /// Each section is cleared before repopulation, including sections with
    /// zero rows in the snapshot.
    async fn import_all(&self, vault: &VaultExport) -> Result<(), StoreError>;

    /// Atomically clear every section.
    ///
    /// Idempotent: wiping an empty store is a no-op. Must be invoked before
    /// the identity-scoped secret is removed from outer session storage, so
    /// no unreachable-but-present store is orphaned.
    async fn wipe(&self) -> Result<(), StoreError>;
}
