//! The identity directory boundary.
//!
//! The directory serves each user's current published public key and
//! one-time pre-key batches. It is untrusted-but-available: responses are
//! validated (well-formed encodings) before use and never trusted for
//! confidentiality.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use keyloom_core::{ConversationId, PreKeyId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// A published one-time pre-key half, as the directory returns it.
///
/// Raw bytes, not a parsed key: the directory is untrusted and malformed
/// encodings must be representable so validation can reject them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPreKey {
    /// Pre-key id.
    pub id: PreKeyId,
    /// Encoded public half.
    pub public: Vec<u8>,
}

/// A user's published bundle for session bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedBundle {
    /// Encoded identity public key.
    pub identity_key: Vec<u8>,
    /// One consumable pre-key, removed from the batch by this fetch.
    pub prekey: PublishedPreKey,
}

/// Lookup service for published keys and participant lists.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// The full participant set of a conversation at this moment.
    async fn participants(&self, conversation: ConversationId)
    -> Result<Vec<UserId>, ClientError>;

    /// A user's current published identity key, raw. `None` if the user has
    /// never published one.
    async fn published_key(&self, user: UserId) -> Result<Option<Vec<u8>>, ClientError>;

    /// Pop one pre-key from a user's published batch, with their identity
    /// key. `None` if the user is unknown or the batch is exhausted.
    async fn take_bundle(&self, user: UserId) -> Result<Option<PublishedBundle>, ClientError>;

    /// Publish this device's identity key.
    async fn publish_identity(&self, user: UserId, key: Vec<u8>) -> Result<(), ClientError>;

    /// Append a batch of one-time pre-keys to a user's published set.
    async fn publish_prekeys(
        &self,
        user: UserId,
        batch: Vec<PublishedPreKey>,
    ) -> Result<(), ClientError>;
}

#[derive(Default)]
struct DirectoryEntry {
    identity_key: Option<Vec<u8>>,
    prekeys: VecDeque<PublishedPreKey>,
}

/// In-memory directory for tests and simulation.
///
/// # Panics
///
/// Operations panic if the internal mutex is poisoned; acceptable for
/// test/simulation code.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    users: Arc<Mutex<HashMap<UserId, DirectoryEntry>>>,
    conversations: Arc<Mutex<HashMap<ConversationId, Vec<UserId>>>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a conversation's participant set.
    #[allow(clippy::expect_used)]
    pub fn set_participants(&self, conversation: ConversationId, participants: Vec<UserId>) {
        self.conversations
            .lock()
            .expect("Mutex poisoned")
            .insert(conversation, participants);
    }

    /// Remaining published pre-keys for a user.
    #[allow(clippy::expect_used)]
    pub fn prekey_count(&self, user: UserId) -> usize {
        self.users
            .lock()
            .expect("Mutex poisoned")
            .get(&user)
            .map_or(0, |entry| entry.prekeys.len())
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    #[allow(clippy::expect_used)]
    async fn participants(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<UserId>, ClientError> {
        Ok(self
            .conversations
            .lock()
            .expect("Mutex poisoned")
            .get(&conversation)
            .cloned()
            .unwrap_or_default())
    }

    #[allow(clippy::expect_used)]
    async fn published_key(&self, user: UserId) -> Result<Option<Vec<u8>>, ClientError> {
        Ok(self
            .users
            .lock()
            .expect("Mutex poisoned")
            .get(&user)
            .and_then(|entry| entry.identity_key.clone()))
    }

    #[allow(clippy::expect_used)]
    async fn take_bundle(&self, user: UserId) -> Result<Option<PublishedBundle>, ClientError> {
        let mut users = self.users.lock().expect("Mutex poisoned");
        let Some(entry) = users.get_mut(&user) else {
            return Ok(None);
        };
        let Some(identity_key) = entry.identity_key.clone() else {
            return Ok(None);
        };
        let Some(prekey) = entry.prekeys.pop_front() else {
            return Ok(None);
        };
        Ok(Some(PublishedBundle { identity_key, prekey }))
    }

    #[allow(clippy::expect_used)]
    async fn publish_identity(&self, user: UserId, key: Vec<u8>) -> Result<(), ClientError> {
        self.users.lock().expect("Mutex poisoned").entry(user).or_default().identity_key =
            Some(key);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn publish_prekeys(
        &self,
        user: UserId,
        batch: Vec<PublishedPreKey>,
    ) -> Result<(), ClientError> {
        self.users
            .lock()
            .expect("Mutex poisoned")
            .entry(user)
            .or_default()
            .prekeys
            .extend(batch);
        Ok(())
    }
}
