//! Messaging orchestration over the key store.
//!
//! Loads ratchet state, advances it, and writes it back - serialized per
//! conversation so two call sites can never derive from the same chain
//! position. Within one conversation ratchet steps apply in message order;
//! across conversations operations interleave freely.
//!
//! Missing state surfaces as [`Decryption::Pending`], never a hard error:
//! key delivery is eventually consistent and the UI renders a "waiting for
//! key" placeholder for exactly as long as that lasts.

use keyloom_core::{
    ConversationId, UserId,
    env::Environment,
    group::{GroupMessage, NONCE_RANDOM_SIZE, decrypt_group_message, encrypt_group_message},
    identity::{IdentityKeyPair, OneTimePreKey, PreKeyBundle, parse_public_key},
    keymat::{Decryption, PendingReason},
    session::{
        PairSession, SessionMessage,
        bootstrap::{initiate, respond},
    },
    RatchetError,
};
use keyloom_store::{ConversationLocks, KeyStore, StoredPreKey};
use tracing::debug;

use crate::{directory::IdentityDirectory, error::ClientError};

/// Number of pre-keys published per batch top-up.
pub const PREKEY_BATCH_SIZE: u32 = 32;

/// Messaging flows bound to one identity's store.
pub struct Messenger<E: Environment, S: KeyStore> {
    env: E,
    store: S,
    locks: ConversationLocks,
}

impl<E: Environment, S: KeyStore> Messenger<E, S> {
    /// Create a messenger over an opened store.
    pub fn new(env: E, store: S) -> Self {
        Self { env, store, locks: ConversationLocks::new() }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Generate and publish the next batch of one-time pre-keys.
    ///
    /// Ids continue above the highest id ever stored, so a consumed id is
    /// never reissued.
    pub async fn publish_prekey_batch<D: IdentityDirectory>(
        &self,
        directory: &D,
        me: UserId,
        identity: &IdentityKeyPair,
    ) -> Result<Vec<u32>, ClientError> {
        let start = match self.store.highest_prekey_id().await? {
            Some(highest) => highest + 1,
            None => 0,
        };

        let mut published = Vec::with_capacity(PREKEY_BATCH_SIZE as usize);
        let mut batch = Vec::with_capacity(PREKEY_BATCH_SIZE as usize);
        for id in start..start + PREKEY_BATCH_SIZE {
            let prekey = OneTimePreKey::from_seed(id, self.env.random_array());
            self.store.put_prekey(&StoredPreKey::from_prekey(&prekey)).await?;
            batch.push(crate::directory::PublishedPreKey {
                id,
                public: prekey.public().to_vec(),
            });
            published.push(id);
        }

        directory.publish_identity(me, identity.public().to_vec()).await?;
        directory.publish_prekeys(me, batch).await?;

        debug!(me, first = start, count = PREKEY_BATCH_SIZE, "published pre-key batch");
        Ok(published)
    }

    /// Start a 1:1 session with a peer, consuming one of their published
    /// pre-keys.
    ///
    /// The bootstrap header is cached as the conversation's pending header
    /// and attached to the first outgoing message.
    pub async fn bootstrap_with<D: IdentityDirectory>(
        &self,
        directory: &D,
        conversation: ConversationId,
        identity: &IdentityKeyPair,
        peer: UserId,
    ) -> Result<(), ClientError> {
        let _guard = self.locks.acquire(conversation).await;

        let Some(bundle) = directory.take_bundle(peer).await? else {
            return Err(ClientError::Directory {
                reason: format!("no published bundle for user {peer}"),
            });
        };

        let identity_public =
            parse_public_key(&bundle.identity_key).map_err(|e| ClientError::CorruptKeyMaterial {
                user_id: Some(peer),
                reason: e.to_string(),
            })?;
        let prekey_public =
            parse_public_key(&bundle.prekey.public).map_err(|e| ClientError::CorruptKeyMaterial {
                user_id: Some(peer),
                reason: e.to_string(),
            })?;

        let peer_bundle = PreKeyBundle {
            identity_public,
            prekey_id: bundle.prekey.id,
            prekey_public,
        };

        let (root, header) = initiate(identity, &peer_bundle, self.env.random_array())?;

        let session = PairSession::initiator(conversation, &root);
        self.store.put_pair_session(&session).await?;
        self.store.put_pending_header(conversation, &header).await?;

        debug!(conversation, peer, prekey = header.prekey_id, "bootstrapped session");
        Ok(())
    }

    /// Encrypt the next message in a 1:1 conversation.
    ///
    /// Attaches the pending bootstrap header if this is the session's first
    /// message; the header is deleted once attached.
    pub async fn encrypt_message(
        &self,
        conversation: ConversationId,
        plaintext: &[u8],
    ) -> Result<SessionMessage, ClientError> {
        let _guard = self.locks.acquire(conversation).await;

        let Some(mut session) = self.store.pair_session(conversation).await? else {
            return Err(ClientError::Ratchet(RatchetError::SessionMissing));
        };

        let mut message = session.encrypt_next(plaintext, self.env.random_array())?;
        message.header = self.store.take_pending_header(conversation).await?;

        self.store.put_pair_session(&session).await?;
        Ok(message)
    }

    /// Decrypt an incoming 1:1 message.
    ///
    /// If no session exists and the message carries a bootstrap header, the
    /// named pre-key is consumed (and deleted) to create one. If no session
    /// can be established yet, the result is `Pending` and the caller
    /// renders a waiting placeholder.
    pub async fn decrypt_message(
        &self,
        identity: &IdentityKeyPair,
        message: &SessionMessage,
    ) -> Result<Decryption<Vec<u8>>, ClientError> {
        let conversation = message.conversation_id;
        let _guard = self.locks.acquire(conversation).await;

        let mut session = match self.store.pair_session(conversation).await? {
            Some(session) => session,
            None => {
                let Some(header) = &message.header else {
                    return Ok(Decryption::Pending(PendingReason::AwaitingSessionKey));
                };

                let Some(stored) = self.store.prekey(header.prekey_id).await? else {
                    // Pre-key already consumed or never existed; without it
                    // the bootstrap cannot be mirrored
                    return Ok(Decryption::Pending(PendingReason::AwaitingSessionKey));
                };

                let root = respond(identity, stored.to_prekey(), header)?;
                self.store.delete_prekey(header.prekey_id).await?;

                debug!(conversation, prekey = header.prekey_id, "session created from header");
                PairSession::responder(conversation, &root)
            },
        };

        let outcome = session.decrypt(message);

        // The session is persisted regardless of the decrypt outcome: a
        // failed item must not undo bootstrap or earlier ratchet steps
        self.store.put_pair_session(&session).await?;

        match outcome {
            Ok(plaintext) => Ok(Decryption::Ready(plaintext)),
            Err(err) => Ok(Decryption::Failed(err)),
        }
    }

    /// Encrypt a group message as this member.
    pub async fn encrypt_group(
        &self,
        conversation: ConversationId,
        me: UserId,
        plaintext: &[u8],
    ) -> Result<GroupMessage, ClientError> {
        let _guard = self.locks.acquire(conversation).await;

        let Some(mut sender) = self.store.group_sender(conversation).await? else {
            return Err(ClientError::Ratchet(RatchetError::SessionMissing));
        };

        let random_suffix: [u8; NONCE_RANDOM_SIZE] = self.env.random_array();
        let message = encrypt_group_message(&mut sender, me, plaintext, random_suffix)?;

        self.store.put_group_sender(&sender).await?;
        Ok(message)
    }

    /// Decrypt a group message from another member.
    ///
    /// `Pending` when that member's chain has not been installed yet.
    pub async fn decrypt_group(
        &self,
        message: &GroupMessage,
    ) -> Result<Decryption<Vec<u8>>, ClientError> {
        let conversation = message.conversation_id;
        let _guard = self.locks.acquire(conversation).await;

        let Some(mut receiver) =
            self.store.group_receiver(conversation, message.sender_id).await?
        else {
            return Ok(Decryption::Pending(PendingReason::AwaitingSessionKey));
        };

        match decrypt_group_message(&mut receiver, message) {
            Ok(plaintext) => {
                self.store.put_group_receiver(&receiver).await?;
                Ok(Decryption::Ready(plaintext))
            },
            // Receiver state is only mutated on success; nothing to persist
            Err(err) => Ok(Decryption::Failed(err)),
        }
    }

    /// Drop this conversation's sender chain without touching peer receiver
    /// states (session reset).
    pub async fn reset_group_sender(
        &self,
        conversation: ConversationId,
    ) -> Result<(), ClientError> {
        let _guard = self.locks.acquire(conversation).await;
        self.store.delete_group_sender(conversation).await?;
        Ok(())
    }
}
