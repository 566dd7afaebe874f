//! Redb-backed durable key store.
//!
//! Uses Redb's ACID transactions with copy-on-write for crash safety. Every
//! value is sealed under the storage key (derived from the identity secret)
//! before it touches disk, so the database file alone reveals nothing.
//!
//! Keys are prefixed with the identity id (big-endian), isolating identities
//! that share a database file; a handle can only reach its own rows.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use keyloom_core::{
    ConversationId, MessageId, PreKeyId, SessionId, UserId,
    group::{GroupReceiverState, GroupSenderState},
    session::{BootstrapHeader, PairSession},
};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    codec::{open_value, seal_value},
    error::StoreError,
    identity_vault::IdentityVault,
    records::{SessionKeyRecord, StoredPreKey},
    store::{KeyStore, StoreHandle},
    vault::VaultExport,
};

/// Table: identity vault. Key: identity prefix. Value: sealed CBOR.
const IDENTITY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("identity");

/// Table: one-time pre-keys. Key: prefix || id (4). Value: sealed CBOR.
const PREKEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("prekeys");

/// Table: 1:1 ratchet state. Key: prefix || conversation (16).
const PAIR_SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pair_sessions");

/// Table: group sender chains. Key: prefix || conversation (16).
const GROUP_SENDERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("group_senders");

/// Table: group receiver chains. Key: prefix || conversation (16) || sender (8).
const GROUP_RECEIVERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("group_receivers");

/// Table: session key records. Key: prefix || session (16) || user (8).
const SESSION_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("session_keys");

/// Table: pending bootstrap headers. Key: prefix || conversation (16).
const PENDING_HEADERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending_headers");

/// Table: retained message keys. Key: prefix || message (16).
const MESSAGE_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("message_keys");

const ALL_TABLES: [TableDefinition<'static, &[u8], &[u8]>; 8] = [
    IDENTITY,
    PREKEYS,
    PAIR_SESSIONS,
    GROUP_SENDERS,
    GROUP_RECEIVERS,
    SESSION_KEYS,
    PENDING_HEADERS,
    MESSAGE_KEYS,
];

/// Durable, encrypted-at-rest store backed by Redb.
///
/// Thread-safe through Redb's internal locking; Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    handle: StoreHandle,
    storage_key: [u8; 32],
}

impl RedbStore {
    /// Open or create the database and scope it to the handle's identity.
    ///
    /// The storage key comes from
    /// [`storage_key_for`](crate::identity_vault::storage_key_for) on the
    /// unlocked identity; without it no row can be opened.
    pub fn open(
        path: impl AsRef<Path>,
        handle: StoreHandle,
        storage_key: [u8; 32],
    ) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        for table in ALL_TABLES {
            let _ = txn.open_table(table).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        debug!(identity = handle.identity(), "opened durable key store");
        Ok(Self { db: Arc::new(db), handle, storage_key })
    }

    /// The handle this store is scoped to.
    pub fn handle(&self) -> StoreHandle {
        self.handle
    }

    /// Scope another identity onto the same database file.
    ///
    /// Redb holds an exclusive file lock, so co-resident identities share
    /// one `Database`; key prefixing keeps their rows isolated.
    pub fn with_handle(&self, handle: StoreHandle, storage_key: [u8; 32]) -> Self {
        Self { db: Arc::clone(&self.db), handle, storage_key }
    }

    fn prefix(&self) -> [u8; 8] {
        self.handle.identity().to_be_bytes()
    }

    fn key_with(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(8 + suffix.len());
        key.extend_from_slice(&self.prefix());
        key.extend_from_slice(suffix);
        key
    }

    /// Upper bound covering every key with this identity's prefix. Suffixes
    /// are at most 24 bytes, so 32 bytes of 0xFF is past all of them.
    fn prefix_end(&self) -> Vec<u8> {
        let mut end = Vec::with_capacity(8 + 32);
        end.extend_from_slice(&self.prefix());
        end.extend_from_slice(&[0xFF; 32]);
        end
    }

    fn put<T: Serialize>(
        &self,
        table: TableDefinition<'static, &[u8], &[u8]>,
        section: &str,
        suffix: &[u8],
        value: &T,
    ) -> Result<(), StoreError> {
        let sealed = seal_value(&self.storage_key, section, value)?;
        let key = self.key_with(suffix);

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(table).map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .insert(key.as_slice(), sealed.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &[u8], &[u8]>,
        section: &str,
        suffix: &[u8],
    ) -> Result<Option<T>, StoreError> {
        let key = self.key_with(suffix);

        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(table).map_err(|e| StoreError::Io(e.to_string()))?;

        match table.get(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(guard) => Ok(Some(open_value(&self.storage_key, section, guard.value())?)),
            None => Ok(None),
        }
    }

    fn delete(
        &self,
        table: TableDefinition<'static, &[u8], &[u8]>,
        suffix: &[u8],
    ) -> Result<(), StoreError> {
        let key = self.key_with(suffix);

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(table).map_err(|e| StoreError::Io(e.to_string()))?;
            table.remove(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Load every row of a section for this identity, in key order.
    fn scan<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, &[u8], &[u8]>,
        section: &str,
    ) -> Result<Vec<T>, StoreError> {
        let start = self.prefix().to_vec();
        let end = self.prefix_end();

        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(table).map_err(|e| StoreError::Io(e.to_string()))?;

        let mut values = Vec::new();
        let range = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        for entry in range {
            let (_, value) = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            values.push(open_value(&self.storage_key, section, value.value())?);
        }
        Ok(values)
    }

    /// Delete every row of a section for this identity inside an open write
    /// transaction.
    fn clear_section(
        txn: &redb::WriteTransaction,
        table: TableDefinition<'static, &[u8], &[u8]>,
        start: &[u8],
        end: &[u8],
    ) -> Result<(), StoreError> {
        let mut table = txn.open_table(table).map_err(|e| StoreError::Io(e.to_string()))?;

        let keys: Vec<Vec<u8>> = {
            let range = table.range(start..=end).map_err(|e| StoreError::Io(e.to_string()))?;
            let mut keys = Vec::new();
            for entry in range {
                let (key, _) = entry.map_err(|e| StoreError::Io(e.to_string()))?;
                keys.push(key.value().to_vec());
            }
            keys
        };

        for key in keys {
            table.remove(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        Ok(())
    }

    fn conversation_suffix(conversation: ConversationId) -> [u8; 16] {
        conversation.to_be_bytes()
    }

    fn receiver_suffix(conversation: ConversationId, sender: UserId) -> [u8; 24] {
        let mut suffix = [0u8; 24];
        suffix[..16].copy_from_slice(&conversation.to_be_bytes());
        suffix[16..].copy_from_slice(&sender.to_be_bytes());
        suffix
    }

    fn session_suffix(session: SessionId, user: UserId) -> [u8; 24] {
        let mut suffix = [0u8; 24];
        suffix[..16].copy_from_slice(&session.to_be_bytes());
        suffix[16..].copy_from_slice(&user.to_be_bytes());
        suffix
    }
}

#[async_trait]
impl KeyStore for RedbStore {
    async fn put_identity(&self, vault: &IdentityVault) -> Result<(), StoreError> {
        self.put(IDENTITY, "identity", &[], vault)
    }

    async fn identity(&self) -> Result<Option<IdentityVault>, StoreError> {
        self.get(IDENTITY, "identity", &[])
    }

    async fn put_prekey(&self, prekey: &StoredPreKey) -> Result<(), StoreError> {
        self.put(PREKEYS, "prekeys", &prekey.id.to_be_bytes(), prekey)
    }

    async fn prekey(&self, id: PreKeyId) -> Result<Option<StoredPreKey>, StoreError> {
        self.get(PREKEYS, "prekeys", &id.to_be_bytes())
    }

    async fn delete_prekey(&self, id: PreKeyId) -> Result<(), StoreError> {
        self.delete(PREKEYS, &id.to_be_bytes())
    }

    async fn highest_prekey_id(&self) -> Result<Option<PreKeyId>, StoreError> {
        let prekeys: Vec<StoredPreKey> = self.scan(PREKEYS, "prekeys")?;
        Ok(prekeys.last().map(|p| p.id))
    }

    async fn put_pair_session(&self, session: &PairSession) -> Result<(), StoreError> {
        self.put(
            PAIR_SESSIONS,
            "pair_sessions",
            &Self::conversation_suffix(session.conversation_id()),
            session,
        )
    }

    async fn pair_session(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<PairSession>, StoreError> {
        self.get(PAIR_SESSIONS, "pair_sessions", &Self::conversation_suffix(conversation))
    }

    async fn delete_pair_session(&self, conversation: ConversationId) -> Result<(), StoreError> {
        self.delete(PAIR_SESSIONS, &Self::conversation_suffix(conversation))
    }

    async fn put_group_sender(&self, state: &GroupSenderState) -> Result<(), StoreError> {
        self.put(
            GROUP_SENDERS,
            "group_senders",
            &Self::conversation_suffix(state.conversation_id()),
            state,
        )
    }

    async fn group_sender(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<GroupSenderState>, StoreError> {
        self.get(GROUP_SENDERS, "group_senders", &Self::conversation_suffix(conversation))
    }

    async fn delete_group_sender(&self, conversation: ConversationId) -> Result<(), StoreError> {
        self.delete(GROUP_SENDERS, &Self::conversation_suffix(conversation))
    }

    async fn put_group_receiver(&self, state: &GroupReceiverState) -> Result<(), StoreError> {
        self.put(
            GROUP_RECEIVERS,
            "group_receivers",
            &Self::receiver_suffix(state.conversation_id(), state.sender_id()),
            state,
        )
    }

    async fn group_receiver(
        &self,
        conversation: ConversationId,
        sender: UserId,
    ) -> Result<Option<GroupReceiverState>, StoreError> {
        self.get(GROUP_RECEIVERS, "group_receivers", &Self::receiver_suffix(conversation, sender))
    }

    async fn delete_group_receiver(
        &self,
        conversation: ConversationId,
        sender: UserId,
    ) -> Result<(), StoreError> {
        self.delete(GROUP_RECEIVERS, &Self::receiver_suffix(conversation, sender))
    }

    async fn put_session_key_records(
        &self,
        records: &[SessionKeyRecord],
    ) -> Result<(), StoreError> {
        // One transaction: every record lands or none do
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(SESSION_KEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            for record in records {
                let sealed = seal_value(&self.storage_key, "session_keys", record)?;
                let key =
                    self.key_with(&Self::session_suffix(record.session_id, record.user_id));
                table
                    .insert(key.as_slice(), sealed.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn session_key_record(
        &self,
        session: SessionId,
        user: UserId,
    ) -> Result<Option<SessionKeyRecord>, StoreError> {
        self.get(SESSION_KEYS, "session_keys", &Self::session_suffix(session, user))
    }

    async fn put_pending_header(
        &self,
        conversation: ConversationId,
        header: &BootstrapHeader,
    ) -> Result<(), StoreError> {
        self.put(
            PENDING_HEADERS,
            "pending_headers",
            &Self::conversation_suffix(conversation),
            &(conversation, header.clone()),
        )
    }

    async fn take_pending_header(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<BootstrapHeader>, StoreError> {
        let key = self.key_with(&Self::conversation_suffix(conversation));

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        let removed = {
            let mut table =
                txn.open_table(PENDING_HEADERS).map_err(|e| StoreError::Io(e.to_string()))?;
            match table.remove(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))? {
                Some(guard) => {
                    let (_, header): (ConversationId, BootstrapHeader) =
                        open_value(&self.storage_key, "pending_headers", guard.value())?;
                    Some(header)
                },
                None => None,
            }
        };
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(removed)
    }

    async fn put_message_key(&self, message: MessageId, key: [u8; 32]) -> Result<(), StoreError> {
        self.put(MESSAGE_KEYS, "message_keys", &message.to_be_bytes(), &(message, key))
    }

    async fn message_key(&self, message: MessageId) -> Result<Option<[u8; 32]>, StoreError> {
        let row: Option<(MessageId, [u8; 32])> =
            self.get(MESSAGE_KEYS, "message_keys", &message.to_be_bytes())?;
        Ok(row.map(|(_, key)| key))
    }

    async fn delete_message_key(&self, message: MessageId) -> Result<(), StoreError> {
        self.delete(MESSAGE_KEYS, &message.to_be_bytes())
    }

    async fn export_all(&self) -> Result<VaultExport, StoreError> {
        Ok(VaultExport {
            identity: self.get(IDENTITY, "identity", &[])?,
            prekeys: self.scan(PREKEYS, "prekeys")?,
            pair_sessions: self.scan(PAIR_SESSIONS, "pair_sessions")?,
            group_senders: self.scan(GROUP_SENDERS, "group_senders")?,
            group_receivers: self.scan(GROUP_RECEIVERS, "group_receivers")?,
            session_key_records: self.scan(SESSION_KEYS, "session_keys")?,
            pending_headers: self.scan(PENDING_HEADERS, "pending_headers")?,
            message_keys: self.scan(MESSAGE_KEYS, "message_keys")?,
        })
    }

    async fn import_all(&self, vault: &VaultExport) -> Result<(), StoreError> {
        let start = self.prefix().to_vec();
        let end = self.prefix_end();

        // One transaction: clear-then-repopulate every section atomically
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        for table in ALL_TABLES {
            Self::clear_section(&txn, table, &start, &end)?;
        }

        {
            let mut table = txn.open_table(IDENTITY).map_err(|e| StoreError::Io(e.to_string()))?;
            if let Some(identity) = &vault.identity {
                let sealed = seal_value(&self.storage_key, "identity", identity)?;
                table
                    .insert(self.key_with(&[]).as_slice(), sealed.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        {
            let mut table = txn.open_table(PREKEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            for prekey in &vault.prekeys {
                let sealed = seal_value(&self.storage_key, "prekeys", prekey)?;
                table
                    .insert(
                        self.key_with(&prekey.id.to_be_bytes()).as_slice(),
                        sealed.as_slice(),
                    )
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        {
            let mut table =
                txn.open_table(PAIR_SESSIONS).map_err(|e| StoreError::Io(e.to_string()))?;
            for session in &vault.pair_sessions {
                let sealed = seal_value(&self.storage_key, "pair_sessions", session)?;
                let suffix = Self::conversation_suffix(session.conversation_id());
                table
                    .insert(self.key_with(&suffix).as_slice(), sealed.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        {
            let mut table =
                txn.open_table(GROUP_SENDERS).map_err(|e| StoreError::Io(e.to_string()))?;
            for sender in &vault.group_senders {
                let sealed = seal_value(&self.storage_key, "group_senders", sender)?;
                let suffix = Self::conversation_suffix(sender.conversation_id());
                table
                    .insert(self.key_with(&suffix).as_slice(), sealed.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        {
            let mut table =
                txn.open_table(GROUP_RECEIVERS).map_err(|e| StoreError::Io(e.to_string()))?;
            for receiver in &vault.group_receivers {
                let sealed = seal_value(&self.storage_key, "group_receivers", receiver)?;
                let suffix =
                    Self::receiver_suffix(receiver.conversation_id(), receiver.sender_id());
                table
                    .insert(self.key_with(&suffix).as_slice(), sealed.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        {
            let mut table =
                txn.open_table(SESSION_KEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            for record in &vault.session_key_records {
                let sealed = seal_value(&self.storage_key, "session_keys", record)?;
                let suffix = Self::session_suffix(record.session_id, record.user_id);
                table
                    .insert(self.key_with(&suffix).as_slice(), sealed.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        {
            let mut table =
                txn.open_table(PENDING_HEADERS).map_err(|e| StoreError::Io(e.to_string()))?;
            for (conversation, header) in &vault.pending_headers {
                let sealed =
                    seal_value(&self.storage_key, "pending_headers", &(conversation, header))?;
                let suffix = Self::conversation_suffix(*conversation);
                table
                    .insert(self.key_with(&suffix).as_slice(), sealed.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        {
            let mut table =
                txn.open_table(MESSAGE_KEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            for (message, key) in &vault.message_keys {
                let sealed = seal_value(&self.storage_key, "message_keys", &(message, key))?;
                table
                    .insert(
                        self.key_with(&message.to_be_bytes()).as_slice(),
                        sealed.as_slice(),
                    )
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        debug!(rows = vault.row_count(), "imported vault snapshot");
        Ok(())
    }

    async fn wipe(&self) -> Result<(), StoreError> {
        let start = self.prefix().to_vec();
        let end = self.prefix_end();

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        for table in ALL_TABLES {
            Self::clear_section(&txn, table, &start, &end)?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        debug!(identity = self.handle.identity(), "wiped key store");
        Ok(())
    }
}
