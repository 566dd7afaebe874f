//! Group messaging via per-author sender keys.
//!
//! Each member owns exactly one forward chain per conversation (their sender
//! state) and tracks every other member's chain independently (receiver
//! states). Sending advances only the sender chain; receiving a message from
//! member X advances only X's receiver chain, so a gap in one member's
//! counter never blocks messages from other members.
//!
//! Rotation replaces the local sender chain with a freshly distributed one
//! and is author-local: receiver states for other members are never touched,
//! so messages sent before a peer's own rotation remain decryptable.

pub mod receiver;
pub mod sender;

use keyloom_crypto::NONCE_SIZE;
pub use receiver::GroupReceiverState;
pub use sender::GroupSenderState;
use serde::{Deserialize, Serialize};

use crate::{ConversationId, UserId, error::RatchetError};

/// Size of the random suffix in a group message nonce.
pub const NONCE_RANDOM_SIZE: usize = 12;

/// An encrypted group message with the metadata needed to ratchet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Position in the author's chain.
    pub counter: u32,
    /// AEAD nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext including authentication tag.
    pub ciphertext: Vec<u8>,
}

/// Encrypt a group message as the local member, advancing the sender chain.
///
/// The random suffix must be fresh bytes from the caller; the rest of the
/// nonce binds the author and chain position.
pub fn encrypt_group_message(
    sender: &mut GroupSenderState,
    sender_id: UserId,
    plaintext: &[u8],
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> Result<GroupMessage, RatchetError> {
    let conversation_id = sender.conversation_id();
    let (message_key, counter) = sender.next_message_key()?;

    let nonce = build_nonce(sender_id, counter, random_suffix);
    let aad = group_aad(conversation_id, sender_id, counter);
    let ciphertext = keyloom_crypto::aead::encrypt(plaintext, &message_key, &nonce, &aad);

    Ok(GroupMessage { conversation_id, sender_id, counter, nonce, ciphertext })
}

/// Decrypt a group message using the author's receiver state.
///
/// Catches the receiver chain up if the counter is ahead (caching skipped
/// keys), or consumes a cached skipped key if it is behind. State is
/// committed only after authentication succeeds.
pub fn decrypt_group_message(
    receiver: &mut GroupReceiverState,
    message: &GroupMessage,
) -> Result<Vec<u8>, RatchetError> {
    receiver.decrypt(message)
}

/// Build a 24-byte nonce: `sender_id (8) || counter (4) || random (12)`.
fn build_nonce(
    sender_id: UserId,
    counter: u32,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0..8].copy_from_slice(&sender_id.to_be_bytes());
    nonce[8..12].copy_from_slice(&counter.to_be_bytes());
    nonce[12..24].copy_from_slice(&random_suffix);
    nonce
}

/// Associated data binding a message to conversation, author, and position.
pub(crate) fn group_aad(
    conversation_id: ConversationId,
    sender_id: UserId,
    counter: u32,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(5 + 16 + 8 + 4);
    aad.extend_from_slice(b"group");
    aad.extend_from_slice(&conversation_id.to_be_bytes());
    aad.extend_from_slice(&sender_id.to_be_bytes());
    aad.extend_from_slice(&counter.to_be_bytes());
    aad
}
