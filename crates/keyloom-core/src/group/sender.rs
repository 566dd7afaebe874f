//! The local member's own forward chain for a group conversation.

use keyloom_crypto::chain;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{ConversationId, error::RatchetError};

/// This device's sender chain for one group conversation.
///
/// Exactly one exists per conversation. The counter advances monotonically
/// on every message sent and is never rewound; chain keys derive forward but
/// never backward.
#[derive(Clone, Serialize, Deserialize)]
pub struct GroupSenderState {
    conversation_id: ConversationId,
    chain_key: [u8; 32],
    counter: u32,
}

impl GroupSenderState {
    /// Create a sender chain from a freshly generated seed.
    pub fn new(conversation_id: ConversationId, seed: [u8; 32]) -> Self {
        Self { conversation_id, chain_key: seed, counter: 0 }
    }

    /// Conversation this chain belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Number of messages sent on this chain.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Current chain key and counter, for sealing into a distribution.
    ///
    /// This is secret material: it goes only into sealed-box fan-out, never
    /// onto a channel in clear.
    pub fn export_chain(&self) -> ([u8; 32], u32) {
        (self.chain_key, self.counter)
    }

    /// Derive the message key for the next outgoing message and advance.
    ///
    /// Returns the key together with the counter it is valid for. The old
    /// chain key is overwritten; a key is never derived twice from the same
    /// position.
    pub fn next_message_key(&mut self) -> Result<([u8; 32], u32), RatchetError> {
        if self.counter == u32::MAX {
            return Err(RatchetError::CounterOverflow { current: self.counter });
        }

        let message_key = chain::message_key(&self.chain_key);
        let next = chain::next_chain_key(&self.chain_key);
        self.chain_key.zeroize();
        self.chain_key = next;

        let counter = self.counter;
        self.counter += 1;

        Ok((message_key, counter))
    }

    /// Replace this chain with a freshly generated one.
    ///
    /// Called on rotation (e.g. membership change); the new seed must then
    /// be distributed to the group. Receiver states for other members are
    /// not involved: rotation is author-local.
    pub fn rotate(&mut self, fresh_seed: [u8; 32]) {
        self.chain_key.zeroize();
        self.chain_key = fresh_seed;
        self.counter = 0;
    }
}

impl Drop for GroupSenderState {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances_monotonically() {
        let mut sender = GroupSenderState::new(1, [0x42; 32]);

        let (_, c0) = sender.next_message_key().unwrap();
        let (_, c1) = sender.next_message_key().unwrap();

        assert_eq!(c0, 0);
        assert_eq!(c1, 1);
        assert_eq!(sender.counter(), 2);
    }

    #[test]
    fn message_keys_are_unique() {
        let mut sender = GroupSenderState::new(1, [0x42; 32]);

        let (k0, _) = sender.next_message_key().unwrap();
        let (k1, _) = sender.next_message_key().unwrap();
        let (k2, _) = sender.next_message_key().unwrap();

        assert_ne!(k0, k1);
        assert_ne!(k1, k2);
        assert_ne!(k0, k2);
    }

    #[test]
    fn same_seed_produces_same_sequence() {
        let mut a = GroupSenderState::new(1, [0x42; 32]);
        let mut b = GroupSenderState::new(1, [0x42; 32]);

        for _ in 0..10 {
            assert_eq!(a.next_message_key().unwrap(), b.next_message_key().unwrap());
        }
    }

    #[test]
    fn rotation_resets_counter_and_diverges() {
        let mut sender = GroupSenderState::new(1, [0x42; 32]);
        let (before, _) = sender.next_message_key().unwrap();

        sender.rotate([0x43; 32]);
        assert_eq!(sender.counter(), 0);

        let (after, counter) = sender.next_message_key().unwrap();
        assert_eq!(counter, 0);
        assert_ne!(before, after);
    }

    #[test]
    fn export_reflects_current_position() {
        let mut sender = GroupSenderState::new(1, [0x42; 32]);
        sender.next_message_key().unwrap();

        let (_, counter) = sender.export_chain();
        assert_eq!(counter, 1);
    }
}
