//! Keyloom Key Lifecycle Core
//!
//! State machines and data model for end-to-end encrypted messaging keys:
//!
//! - **Identity**: long-lived X25519 keypair per device, consumable one-time
//!   pre-keys for session bootstrap
//! - **Session ratchet**: per-conversation forward-secret symmetric ratchet
//!   for 1:1 messaging, bootstrapped X3DH-style, tolerant of out-of-order
//!   delivery through a bounded skipped-key cache
//! - **Group ratchet**: per-(conversation, author) forward hash chains; each
//!   member advances only their own sender chain, receivers track every other
//!   member's chain independently
//!
//! All state here is plain data operated on by pure logic; persistence and
//! I/O live in the store and client crates. Randomness (nonces, ephemeral
//! seeds) is caller-provided via the [`env::Environment`] abstraction so
//! every state machine is deterministic under test.
//!
//! # Forward secrecy
//!
//! Chain keys derive forward but never backward: compromising a device
//! reveals nothing about messages whose keys were already consumed and
//! discarded. Skipped keys are the deliberate exception and are bounded in
//! both count and retention to cap that exposure window.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;
pub mod group;
pub mod identity;
pub mod keymat;
pub mod session;

pub use error::RatchetError;

/// Identifier for a conversation (1:1 or group).
pub type ConversationId = u128;

/// Identifier for a user.
pub type UserId = u64;

/// Identifier shared by all records of one key-distribution event.
pub type SessionId = u128;

/// Identifier for a message, used by the message-key cache.
pub type MessageId = u128;

/// Identifier for a one-time pre-key. Monotonically increasing, never reused.
pub type PreKeyId = u32;
