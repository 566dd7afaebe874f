//! Keyloom Key Store
//!
//! Persistent, per-identity, encrypted-at-rest repository of all
//! cryptographic material: the identity keypair, one-time pre-keys,
//! per-conversation ratchet state, group sender/receiver chains, cached
//! message keys, and pending session headers.
//!
//! # Store selection fails closed
//!
//! Every store is opened through an explicit [`StoreHandle`] resolved from
//! an authenticated identity. There is no ambient "current user": with no
//! identity there is no handle, and without a handle no store can be opened
//! or touched.
//!
//! # Bulk operations
//!
//! [`KeyStore::export_all`] and [`KeyStore::import_all`] are transactional
//! at store-section granularity. Import clears a section's existing contents
//! before repopulating it, even when the snapshot has no rows for that
//! section, so a migration can shrink state as well as grow it.
//!
//! # Backends
//!
//! [`MemoryStore`] (tests, simulation) and [`RedbStore`] (durable, ACID,
//! rows sealed under a key derived from the identity secret).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod codec;
pub mod error;
pub mod identity_vault;
pub mod memory;
pub mod records;
pub mod redb_store;
pub mod serial;
pub mod store;
pub mod vault;

pub use error::StoreError;
pub use identity_vault::{IdentityVault, storage_key_for};
pub use memory::MemoryStore;
pub use records::{SessionKeyRecord, StoredPreKey};
pub use redb_store::RedbStore;
pub use serial::ConversationLocks;
pub use store::{KeyStore, StoreHandle};
pub use vault::VaultExport;
