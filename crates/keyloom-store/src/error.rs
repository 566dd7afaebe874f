//! Error types for the key store.

use thiserror::Error;

/// Errors from key store operations.
///
/// `Io` and `Serialization` are the persistence-layer failures the rest of
/// the system sees as "storage failure": they propagate, never get
/// swallowed. `CorruptRow` means an at-rest value failed to open and must be
/// treated as fatal for that row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No authenticated identity was resolved; the store fails closed.
    #[error("no authenticated identity: store selection fails closed")]
    NoIdentity,

    /// The password did not match the identity vault's verifier.
    #[error("invalid password")]
    InvalidPassword,

    /// A stored row failed to authenticate or parse.
    #[error("corrupt stored row: {reason}")]
    CorruptRow {
        /// Which row or section failed.
        reason: String,
    },

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The underlying persistence layer failed.
    #[error("storage I/O error: {0}")]
    Io(String),
}
