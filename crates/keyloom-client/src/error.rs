//! Error types for client flows.

use keyloom_core::{RatchetError, UserId};
use keyloom_crypto::CryptoError;
use keyloom_store::StoreError;
use thiserror::Error;

/// Errors from distribution, migration, and messaging flows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// One or more participants lacked a usable public key. Fatal to the
    /// whole distribution attempt: no records were persisted, and the
    /// initiator sees exactly which members could not be keyed.
    #[error("distribution incomplete: no usable key for users {missing:?}")]
    IncompleteDistribution {
        /// Participants without a usable published key.
        missing: Vec<UserId>,
    },

    /// A published key was malformed. A hard failure of the whole
    /// operation, not a skip: malformed keys usually indicate corruption
    /// elsewhere in the identity system.
    #[error("corrupt key material for user {user_id:?}: {reason}")]
    CorruptKeyMaterial {
        /// Whose key was malformed, when attributable.
        user_id: Option<UserId>,
        /// What was malformed.
        reason: String,
    },

    /// A ratchet operation failed.
    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    /// The key store failed; propagated, never swallowed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A primitive operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The relay channel failed or closed.
    #[error("relay error: {reason}")]
    Relay {
        /// Transport-level description.
        reason: String,
    },

    /// The identity directory failed.
    #[error("directory error: {reason}")]
    Directory {
        /// Lookup-level description.
        reason: String,
    },

    /// A migration attempt failed; the flow must restart from `Waiting`
    /// with fresh ephemeral material.
    #[error("migration failed: {reason}")]
    MigrationFailed {
        /// Why the transfer was abandoned.
        reason: String,
    },

    /// The crypto worker is gone; its task panicked or the runtime is
    /// shutting down.
    #[error("crypto worker closed")]
    WorkerClosed,
}
