//! In-memory key store for testing and simulation.

#![allow(clippy::expect_used, reason = "Mutex poisoning panics are acceptable in test storage")]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

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
    store::{KeyStore, StoreHandle},
    vault::VaultExport,
};

/// In-memory store implementation.
///
/// `BTreeMap` sections give deterministic export ordering for free. All
/// state is behind `Arc<Mutex<>>` so clones share one store, matching how
/// multiple protocol components hold the same identity's store. Values live
/// in process memory only, so at-rest sealing does not apply; the durable
/// backend seals every row.
#[derive(Clone)]
pub struct MemoryStore {
    handle: StoreHandle,
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    identity: Option<IdentityVault>,
    prekeys: BTreeMap<PreKeyId, StoredPreKey>,
    pair_sessions: BTreeMap<ConversationId, PairSession>,
    group_senders: BTreeMap<ConversationId, GroupSenderState>,
    group_receivers: BTreeMap<(ConversationId, UserId), GroupReceiverState>,
    session_key_records: BTreeMap<(SessionId, UserId), SessionKeyRecord>,
    pending_headers: BTreeMap<ConversationId, BootstrapHeader>,
    message_keys: BTreeMap<MessageId, [u8; 32]>,
}

impl MemoryStore {
    /// Open an in-memory store for the handle's identity.
    pub fn open(handle: StoreHandle) -> Self {
        Self { handle, inner: Arc::new(Mutex::new(MemoryStoreInner::default())) }
    }

    /// The handle this store is scoped to.
    pub fn handle(&self) -> StoreHandle {
        self.handle
    }

    /// Total rows across all sections. Useful in tests.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn row_count(&self) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        usize::from(inner.identity.is_some())
            + inner.prekeys.len()
            + inner.pair_sessions.len()
            + inner.group_senders.len()
            + inner.group_receivers.len()
            + inner.session_key_records.len()
            + inner.pending_headers.len()
            + inner.message_keys.len()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn put_identity(&self, vault: &IdentityVault) -> Result<(), StoreError> {
        self.inner.lock().expect("Mutex poisoned").identity = Some(vault.clone());
        Ok(())
    }

    async fn identity(&self) -> Result<Option<IdentityVault>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").identity.clone())
    }

    async fn put_prekey(&self, prekey: &StoredPreKey) -> Result<(), StoreError> {
        self.inner.lock().expect("Mutex poisoned").prekeys.insert(prekey.id, prekey.clone());
        Ok(())
    }

    async fn prekey(&self, id: PreKeyId) -> Result<Option<StoredPreKey>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").prekeys.get(&id).cloned())
    }

    async fn delete_prekey(&self, id: PreKeyId) -> Result<(), StoreError> {
        self.inner.lock().expect("Mutex poisoned").prekeys.remove(&id);
        Ok(())
    }

    async fn highest_prekey_id(&self) -> Result<Option<PreKeyId>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").prekeys.keys().next_back().copied())
    }

    async fn put_pair_session(&self, session: &PairSession) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .pair_sessions
            .insert(session.conversation_id(), session.clone());
        Ok(())
    }

    async fn pair_session(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<PairSession>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").pair_sessions.get(&conversation).cloned())
    }

    async fn delete_pair_session(&self, conversation: ConversationId) -> Result<(), StoreError> {
        self.inner.lock().expect("Mutex poisoned").pair_sessions.remove(&conversation);
        Ok(())
    }

    async fn put_group_sender(&self, state: &GroupSenderState) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .group_senders
            .insert(state.conversation_id(), state.clone());
        Ok(())
    }

    async fn group_sender(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<GroupSenderState>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").group_senders.get(&conversation).cloned())
    }

    async fn delete_group_sender(&self, conversation: ConversationId) -> Result<(), StoreError> {
        self.inner.lock().expect("Mutex poisoned").group_senders.remove(&conversation);
        Ok(())
    }

    async fn put_group_receiver(&self, state: &GroupReceiverState) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .group_receivers
            .insert((state.conversation_id(), state.sender_id()), state.clone());
        Ok(())
    }

    async fn group_receiver(
        &self,
        conversation: ConversationId,
        sender: UserId,
    ) -> Result<Option<GroupReceiverState>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("Mutex poisoned")
            .group_receivers
            .get(&(conversation, sender))
            .cloned())
    }

    async fn delete_group_receiver(
        &self,
        conversation: ConversationId,
        sender: UserId,
    ) -> Result<(), StoreError> {
        self.inner.lock().expect("Mutex poisoned").group_receivers.remove(&(conversation, sender));
        Ok(())
    }

    async fn put_session_key_records(
        &self,
        records: &[SessionKeyRecord],
    ) -> Result<(), StoreError> {
        // Single lock acquisition makes the batch atomic
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        for record in records {
            inner
                .session_key_records
                .insert((record.session_id, record.user_id), record.clone());
        }
        Ok(())
    }

    async fn session_key_record(
        &self,
        session: SessionId,
        user: UserId,
    ) -> Result<Option<SessionKeyRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("Mutex poisoned")
            .session_key_records
            .get(&(session, user))
            .cloned())
    }

    async fn put_pending_header(
        &self,
        conversation: ConversationId,
        header: &BootstrapHeader,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .pending_headers
            .insert(conversation, header.clone());
        Ok(())
    }

    async fn take_pending_header(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<BootstrapHeader>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").pending_headers.remove(&conversation))
    }

    async fn put_message_key(&self, message: MessageId, key: [u8; 32]) -> Result<(), StoreError> {
        self.inner.lock().expect("Mutex poisoned").message_keys.insert(message, key);
        Ok(())
    }

    async fn message_key(&self, message: MessageId) -> Result<Option<[u8; 32]>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").message_keys.get(&message).copied())
    }

    async fn delete_message_key(&self, message: MessageId) -> Result<(), StoreError> {
        self.inner.lock().expect("Mutex poisoned").message_keys.remove(&message);
        Ok(())
    }

    async fn export_all(&self) -> Result<VaultExport, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(VaultExport {
            identity: inner.identity.clone(),
            prekeys: inner.prekeys.values().cloned().collect(),
            pair_sessions: inner.pair_sessions.values().cloned().collect(),
            group_senders: inner.group_senders.values().cloned().collect(),
            group_receivers: inner.group_receivers.values().cloned().collect(),
            session_key_records: inner.session_key_records.values().cloned().collect(),
            pending_headers: inner
                .pending_headers
                .iter()
                .map(|(conversation, header)| (*conversation, header.clone()))
                .collect(),
            message_keys: inner.message_keys.iter().map(|(id, key)| (*id, *key)).collect(),
        })
    }

    async fn import_all(&self, vault: &VaultExport) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        // Clear-then-repopulate per section, including empty ones
        inner.identity = vault.identity.clone();

        inner.prekeys.clear();
        inner.prekeys.extend(vault.prekeys.iter().map(|p| (p.id, p.clone())));

        inner.pair_sessions.clear();
        inner
            .pair_sessions
            .extend(vault.pair_sessions.iter().map(|s| (s.conversation_id(), s.clone())));

        inner.group_senders.clear();
        inner
            .group_senders
            .extend(vault.group_senders.iter().map(|s| (s.conversation_id(), s.clone())));

        inner.group_receivers.clear();
        inner.group_receivers.extend(
            vault
                .group_receivers
                .iter()
                .map(|r| ((r.conversation_id(), r.sender_id()), r.clone())),
        );

        inner.session_key_records.clear();
        inner.session_key_records.extend(
            vault.session_key_records.iter().map(|r| ((r.session_id, r.user_id), r.clone())),
        );

        inner.pending_headers.clear();
        inner
            .pending_headers
            .extend(vault.pending_headers.iter().map(|(c, h)| (*c, h.clone())));

        inner.message_keys.clear();
        inner.message_keys.extend(vault.message_keys.iter().copied());

        Ok(())
    }

    async fn wipe(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        *inner = MemoryStoreInner::default();
        Ok(())
    }
}
