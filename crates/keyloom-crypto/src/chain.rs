//! Ratchet chain steps: one-way key derivation for forward secrecy.
//!
//! A chain key can derive forward (next chain key, message key) but never
//! backward. Both session and group ratchets are built from these two steps.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key.
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key.
const MESSAGE_LABEL: &[u8] = b"message";

/// Derive the next chain key from the current chain key.
pub fn next_chain_key(chain_key: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    hmac_step(chain_key, CHAIN_LABEL)
}

/// Derive the message key for the current chain position.
///
/// The message key is independent of [`next_chain_key`]: holding a message
/// key reveals nothing about the chain it came from.
pub fn message_key(chain_key: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    hmac_step(chain_key, MESSAGE_LABEL)
}

fn hmac_step(chain_key: &[u8; KEY_SIZE], label: &[u8]) -> [u8; KEY_SIZE] {
    let Ok(mut mac) = HmacSha256::new_from_slice(chain_key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let result = mac.finalize().into_bytes();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&result);
    key
}
