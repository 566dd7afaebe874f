//! 1:1 session establishment and forward-secret ratcheting.
//!
//! A session moves through three states:
//!
//! ```text
//! Uninitialized ──bootstrap──> Bootstrapped ──first send/recv──> Ratcheting
//! ```
//!
//! `Uninitialized` is the absence of stored state; [`bootstrap`] consumes a
//! one-time pre-key to derive the initial root, and [`ratchet::PairSession`]
//! carries the per-direction chains from there.

pub mod bootstrap;
pub mod ratchet;

pub use bootstrap::BootstrapHeader;
pub use ratchet::{PairSession, SessionMessage, SessionPhase};
