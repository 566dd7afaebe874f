//! Keyloom Client Flows
//!
//! The protocols that move key material between devices, all over untrusted
//! channels:
//!
//! - **Session key distribution** ([`distribution`]): a fresh group key is
//!   sealed individually for every participant and published as opaque
//!   blobs; each client fetches and unseals only its own.
//! - **Device migration** ([`migration`]): one-shot transfer of the entire
//!   key store from an old device to a new one through a relay that only
//!   ever sees sealed bytes and chunk indices.
//! - **Messaging** ([`messenger`]): load-advance-store orchestration of the
//!   pair and group ratchets against the key store, serialized per
//!   conversation.
//! - **Worker offload** ([`worker`]): heavy derivations and whole-vault
//!   AEAD passes run off the control thread, correlated by request id.
//!
//! The relay and directory are boundary traits ([`relay`], [`directory`]);
//! in-memory implementations ship for tests and simulation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod directory;
pub mod distribution;
pub mod env;
pub mod error;
pub mod messenger;
pub mod migration;
pub mod relay;
pub mod worker;

pub use directory::{IdentityDirectory, InMemoryDirectory, PublishedPreKey};
pub use env::TokioEnv;
pub use error::ClientError;
pub use messenger::Messenger;
pub use relay::{InMemoryRelay, MigrationEvent, RelayChannel};
pub use worker::CryptoWorker;
