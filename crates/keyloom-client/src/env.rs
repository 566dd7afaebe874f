//! Production environment backed by the OS and the Tokio runtime.

use std::time::Duration;

use keyloom_core::env::Environment;
use rand::RngCore;

/// Environment using the system clock, Tokio timers, and OS entropy.
#[derive(Clone, Copy, Default)]
pub struct TokioEnv;

impl TokioEnv {
    /// Create the production environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for TokioEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}
