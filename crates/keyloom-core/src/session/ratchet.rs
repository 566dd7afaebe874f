//! Forward-secret symmetric ratchet for 1:1 conversations.
//!
//! One chain per direction, derived from the bootstrap root. Every send or
//! receive derives a fresh message key and steps the chain forward; a
//! message key is never derived twice from the same chain position.
//!
//! # Out-of-order delivery
//!
//! If an incoming counter is ahead of the receiving chain, the intermediate
//! message keys are cached as skipped keys rather than discarded, then
//! consumed (and deleted) when the matching message arrives. Retention is
//! bounded: at most [`MAX_SKIP`] steps per catch-up and
//! [`MAX_RETAINED_SKIPPED`] cached keys per session, evicting the lowest
//! counters first.

use std::collections::BTreeMap;

use keyloom_crypto::{NONCE_SIZE, aead, chain, kdf};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{ConversationId, error::RatchetError, session::bootstrap::BootstrapHeader};

/// Maximum ratchet steps a single catch-up may skip.
pub const MAX_SKIP: u32 = 512;

/// Maximum skipped keys retained per session. Bounds both storage and the
/// window an attacker gains from stealing the device.
pub const MAX_RETAINED_SKIPPED: usize = 1024;

/// Chain label for the initiator-to-responder direction.
const INITIATOR_CHAIN: &[u8] = b"pair/initiator";

/// Chain label for the responder-to-initiator direction.
const RESPONDER_CHAIN: &[u8] = b"pair/responder";

/// Where a session is in its lifecycle. `Uninitialized` is the absence of
/// stored state, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Root derived, no message sent or received yet.
    Bootstrapped,
    /// At least one ratchet step taken.
    Ratcheting,
}

/// An encrypted 1:1 message with the metadata needed to ratchet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Position in the sender's chain.
    pub counter: u32,
    /// AEAD nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext including authentication tag.
    pub ciphertext: Vec<u8>,
    /// Bootstrap header, present only on the first message of a session.
    pub header: Option<BootstrapHeader>,
}

/// Full ratchet state for one 1:1 conversation.
///
/// Overwritten in the store on every ratchet step. Incoming state is
/// committed only after authentication succeeds, so garbage traffic cannot
/// desynchronize the receiving chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct PairSession {
    conversation_id: ConversationId,
    phase: SessionPhase,
    send_chain: [u8; 32],
    send_counter: u32,
    recv_chain: [u8; 32],
    recv_counter: u32,
    skipped: BTreeMap<u32, [u8; 32]>,
}

impl PairSession {
    /// Create the initiator-side session from a bootstrap root.
    pub fn initiator(conversation_id: ConversationId, root: &[u8; 32]) -> Self {
        Self::new(conversation_id, root, INITIATOR_CHAIN, RESPONDER_CHAIN)
    }

    /// Create the responder-side session from the same root.
    pub fn responder(conversation_id: ConversationId, root: &[u8; 32]) -> Self {
        Self::new(conversation_id, root, RESPONDER_CHAIN, INITIATOR_CHAIN)
    }

    fn new(
        conversation_id: ConversationId,
        root: &[u8; 32],
        send_label: &[u8],
        recv_label: &[u8],
    ) -> Self {
        Self {
            conversation_id,
            phase: SessionPhase::Bootstrapped,
            send_chain: kdf::derive_subkey(root, send_label),
            send_counter: 0,
            recv_chain: kdf::derive_subkey(root, recv_label),
            recv_counter: 0,
            skipped: BTreeMap::new(),
        }
    }

    /// Conversation this session belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Next counter the sending chain will use.
    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    /// Next counter the receiving chain expects.
    pub fn recv_counter(&self) -> u32 {
        self.recv_counter
    }

    /// Number of cached skipped keys.
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// Encrypt the next outgoing message, advancing the sending chain.
    ///
    /// The nonce must be fresh random bytes from the caller.
    pub fn encrypt_next(
        &mut self,
        plaintext: &[u8],
        nonce: [u8; NONCE_SIZE],
    ) -> Result<SessionMessage, RatchetError> {
        if self.send_counter == u32::MAX {
            return Err(RatchetError::CounterOverflow { current: self.send_counter });
        }

        let counter = self.send_counter;
        let mut message_key = chain::message_key(&self.send_chain);
        let aad = message_aad(self.conversation_id, counter);
        let ciphertext = aead::encrypt(plaintext, &message_key, &nonce, &aad);
        message_key.zeroize();

        let next = chain::next_chain_key(&self.send_chain);
        self.send_chain.zeroize();
        self.send_chain = next;
        self.send_counter += 1;
        self.phase = SessionPhase::Ratcheting;

        Ok(SessionMessage {
            conversation_id: self.conversation_id,
            counter,
            nonce,
            ciphertext,
            header: None,
        })
    }

    /// Decrypt an incoming message, advancing or catching up the receiving
    /// chain.
    ///
    /// # Errors
    ///
    /// - `DuplicateMessage` if the counter is behind and its skipped key was
    ///   already consumed
    /// - `TooFarAhead` if the gap exceeds [`MAX_SKIP`]
    /// - `DecryptionFailed` if authentication fails; state is untouched
    pub fn decrypt(&mut self, message: &SessionMessage) -> Result<Vec<u8>, RatchetError> {
        if message.conversation_id != self.conversation_id {
            return Err(RatchetError::DecryptionFailed {
                reason: "message belongs to a different conversation".to_string(),
            });
        }

        let aad = message_aad(self.conversation_id, message.counter);

        // Behind the chain: only a cached skipped key can decrypt it.
        if message.counter < self.recv_counter {
            let Some(skipped_key) = self.skipped.get(&message.counter) else {
                return Err(RatchetError::DuplicateMessage { counter: message.counter });
            };

            let plaintext = aead::decrypt(&message.ciphertext, &message.nonce, skipped_key, &aad)?;

            // Consume only after successful authentication
            if let Some(mut consumed) = self.skipped.remove(&message.counter) {
                consumed.zeroize();
            }
            return Ok(plaintext);
        }

        if message.counter == u32::MAX {
            return Err(RatchetError::CounterOverflow { current: self.recv_counter });
        }

        let gap = message.counter - self.recv_counter;
        if gap > MAX_SKIP {
            return Err(RatchetError::TooFarAhead {
                current: self.recv_counter,
                requested: message.counter,
                max: MAX_SKIP,
            });
        }

        // Walk a scratch chain up to the message position; nothing is
        // committed until the ciphertext authenticates.
        let mut scratch = self.recv_chain;
        let mut pending_skips = Vec::with_capacity(gap as usize);
        for counter in self.recv_counter..message.counter {
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
        self.recv_chain.zeroize();
        self.recv_chain = next;
        self.recv_counter = message.counter + 1;
        self.phase = SessionPhase::Ratcheting;

        // Bound total retention, oldest counters first
        while self.skipped.len() > MAX_RETAINED_SKIPPED {
            if let Some((_, mut evicted)) = self.skipped.pop_first() {
                evicted.zeroize();
            }
        }

        Ok(plaintext)
    }
}

impl Drop for PairSession {
    fn drop(&mut self) {
        self.send_chain.zeroize();
        self.recv_chain.zeroize();
        for (_, mut key) in std::mem::take(&mut self.skipped) {
            key.zeroize();
        }
    }
}

/// Associated data binding a message to its conversation and position.
fn message_aad(conversation_id: ConversationId, counter: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + 16 + 4);
    aad.extend_from_slice(b"pair");
    aad.extend_from_slice(&conversation_id.to_be_bytes());
    aad.extend_from_slice(&counter.to_be_bytes());
    aad
}
