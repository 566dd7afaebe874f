//! Keyloom Cryptographic Primitives
//!
//! Stateless cryptographic building blocks for the Keyloom key lifecycle.
//! Every function is pure over explicit byte buffers: callers provide random
//! bytes (nonces, ephemeral seeds) so outputs are deterministic under test.
//!
//! # Primitives
//!
//! ```text
//! sealed_box  — anonymous X25519 public-key encryption (session-key fan-out,
//!               migration key exchange)
//! aead        — XChaCha20-Poly1305 (message bodies, vault blobs, at-rest rows)
//! chain       — HMAC-SHA256 ratchet steps (chain key -> next chain key,
//!               chain key -> message key)
//! kdf         — Argon2id password derivation, HKDF subkey derivation
//! hash        — SHA-256 digest, constant-time comparison
//! ```
//!
//! # Failure policy
//!
//! Any open/decrypt given a corrupt, truncated, or tampered buffer returns a
//! typed [`CryptoError`] and no partial plaintext. Callers must treat partial
//! failure as total failure.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod chain;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod sealed_box;

pub use error::CryptoError;

/// Size of symmetric keys in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of XChaCha20 nonces in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of X25519 public keys in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;
