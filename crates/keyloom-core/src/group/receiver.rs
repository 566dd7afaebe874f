//! This device's view of another member's sender chain.

use std::collections::BTreeMap;

use keyloom_crypto::{aead, chain};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    ConversationId, UserId,
    error::RatchetError,
    group::{GroupMessage, group_aad},
    session::ratchet::{MAX_RETAINED_SKIPPED, MAX_SKIP},
};

/// Receiver chain for one (conversation, sender) pair.
///
/// Holds its own skipped-key list for reordering tolerance, independent of
/// every other member's chain. Installed from a sealed distribution and
/// replaced when that member rotates.
#[derive(Clone, Serialize, Deserialize)]
pub struct GroupReceiverState {
    conversation_id: ConversationId,
    sender_id: UserId,
    chain_key: [u8; 32],
    counter: u32,
    skipped: BTreeMap<u32, [u8; 32]>,
}

impl GroupReceiverState {
    /// Install a receiver chain from a distributed (chain key, counter) pair.
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        chain_key: [u8; 32],
        counter: u32,
    ) -> Self {
        Self { conversation_id, sender_id, chain_key, counter, skipped: BTreeMap::new() }
    }

    /// Conversation this chain belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// The member whose chain this tracks.
    pub fn sender_id(&self) -> UserId {
        self.sender_id
    }

    /// Next counter this chain expects.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Number of cached skipped keys.
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// Decrypt a message from this chain's author.
    ///
    /// State is committed only after authentication succeeds; garbage
    /// claiming a high counter cannot desynchronize the chain.
    pub(crate) fn decrypt(&mut self, message: &GroupMessage) -> Result<Vec<u8>, RatchetError> {
        if message.conversation_id != self.conversation_id || message.sender_id != self.sender_id {
            return Err(RatchetError::DecryptionFailed {
                reason: "message does not match this receiver chain".to_string(),
            });
        }

        let aad = group_aad(self.conversation_id, self.sender_id, message.counter);

        if message.counter < self.counter {
            let Some(skipped_key) = self.skipped.get(&message.counter) else {
                return Err(RatchetError::DuplicateMessage { counter: message.counter });
            };

            let plaintext = aead::decrypt(&message.ciphertext, &message.nonce, skipped_key, &aad)?;
            if let Some(mut consumed) = self.skipped.remove(&message.counter) {
                consumed.zeroize();
            }
            return Ok(plaintext);
        }

        if message.counter == u32::MAX {
            return Err(RatchetError::CounterOverflow { current: self.counter });
        }

        let gap = message.counter - self.counter;
        if gap > MAX_SKIP {
            return Err(RatchetError::TooFarAhead {
                current: self.counter,
                requested: message.counter,
                max: MAX_SKIP,
            });
        }

        let mut scratch = self.chain_key;
        let mut pending_skips = Vec::with_capacity(gap as usize);
        for counter in self.counter..message.counter {
            pending_skips.push((counter, chain::message_key(&scratch)));
            scratch = chain::next_chain_key(&scratch);
        }

        let mut message_key = chain::message_key(&scratch);
        let result = aead::decrypt(&message.ciphertext, &message.nonce, &message_key, &aad);
        message_key.zeroize();

        let plaintext = match result {
            Ok(plaintext) => plaintext,
            Err(err) => {
                scratch.zeroize();
                for (_, mut key) in pending_skips {
                    key.zeroize();
                }
                return Err(err.into());
            },
        };

        for (counter, key) in pending_skips {
            self.skipped.insert(counter, key);
        }
        let next = chain::next_chain_key(&scratch);
        scratch.zeroize();
        self.chain_key.zeroize();
        self.chain_key = next;
        self.counter = message.counter + 1;

        while self.skipped.len() > MAX_RETAINED_SKIPPED {
            if let Some((_, mut evicted)) = self.skipped.pop_first() {
                evicted.zeroize();
            }
        }

        Ok(plaintext)
    }
}

impl Drop for GroupReceiverState {
    fn drop(&mut self) {
        self.chain_key.zeroize();
        for (_, mut key) in std::mem::take(&mut self.skipped) {
            key.zeroize();
        }
    }
}
