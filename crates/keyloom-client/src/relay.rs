//! The untrusted relay boundary.
//!
//! The relay carries only sealed/encrypted payloads plus plaintext routing
//! metadata (room/session identifiers, chunk indices, participant ids). No
//! raw key ever appears on this channel.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use keyloom_core::{SessionId, UserId};
use keyloom_store::SessionKeyRecord;
use tokio::sync::mpsc;

use crate::{
    error::ClientError,
    migration::{MigrationAck, MigrationAnnounce, MigrationChunk},
};

/// Migration traffic as the relay sees it: sealed bytes and indices only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    /// Transfer parameters and the sealed transport key.
    Announce(MigrationAnnounce),
    /// One ciphertext chunk, tagged with its sequence index.
    Chunk(MigrationChunk),
    /// Receiver's success/failure acknowledgement.
    Ack(MigrationAck),
}

/// Server-side channel for key distribution and migration traffic.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Persist a distribution's records server-side, atomically: either
    /// every record is stored or none are.
    async fn publish_session_keys(
        &self,
        records: Vec<SessionKeyRecord>,
    ) -> Result<(), ClientError>;

    /// Fetch the sealed record addressed to (session, user). Clients can
    /// only unseal their own.
    async fn fetch_session_key(
        &self,
        session: SessionId,
        user: UserId,
    ) -> Result<Option<SessionKeyRecord>, ClientError>;

    /// Send a migration event toward the peer device.
    async fn send_migration(&self, event: MigrationEvent) -> Result<(), ClientError>;

    /// Wait for the next migration event from the peer device.
    async fn recv_migration(&self) -> Result<MigrationEvent, ClientError>;
}

/// In-memory relay for tests and simulation.
///
/// [`pair`](Self::pair) returns two linked endpoints: what one sends, the
/// other receives, and both share one server-side record set.
#[derive(Clone)]
pub struct InMemoryRelay {
    records: Arc<Mutex<HashMap<(SessionId, UserId), SessionKeyRecord>>>,
    outgoing: mpsc::UnboundedSender<MigrationEvent>,
    incoming: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MigrationEvent>>>,
}

impl InMemoryRelay {
    /// Create two linked relay endpoints.
    pub fn pair() -> (Self, Self) {
        let records = Arc::new(Mutex::new(HashMap::new()));
        let (to_b, from_a) = mpsc::unbounded_channel();
        let (to_a, from_b) = mpsc::unbounded_channel();

        let a = Self {
            records: Arc::clone(&records),
            outgoing: to_b,
            incoming: Arc::new(tokio::sync::Mutex::new(from_b)),
        };
        let b = Self {
            records,
            outgoing: to_a,
            incoming: Arc::new(tokio::sync::Mutex::new(from_a)),
        };
        (a, b)
    }

    /// Number of records the relay currently holds.
    #[allow(clippy::expect_used)]
    pub fn record_count(&self) -> usize {
        self.records.lock().expect("Mutex poisoned").len()
    }
}

#[async_trait]
impl RelayChannel for InMemoryRelay {
    #[allow(clippy::expect_used)]
    async fn publish_session_keys(
        &self,
        records: Vec<SessionKeyRecord>,
    ) -> Result<(), ClientError> {
        let mut store = self.records.lock().expect("Mutex poisoned");
        for record in records {
            store.insert((record.session_id, record.user_id), record);
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn fetch_session_key(
        &self,
        session: SessionId,
        user: UserId,
    ) -> Result<Option<SessionKeyRecord>, ClientError> {
        Ok(self.records.lock().expect("Mutex poisoned").get(&(session, user)).cloned())
    }

    async fn send_migration(&self, event: MigrationEvent) -> Result<(), ClientError> {
        self.outgoing
            .send(event)
            .map_err(|_| ClientError::Relay { reason: "peer endpoint closed".to_string() })
    }

    async fn recv_migration(&self) -> Result<MigrationEvent, ClientError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| ClientError::Relay { reason: "peer endpoint closed".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn linked_endpoints_exchange_events() {
        let (a, b) = InMemoryRelay::pair();

        a.send_migration(MigrationEvent::Ack(MigrationAck { room_id: 1, success: true }))
            .await
            .unwrap();

        let event = b.recv_migration().await.unwrap();
        assert_eq!(event, MigrationEvent::Ack(MigrationAck { room_id: 1, success: true }));
    }

    #[tokio::test]
    async fn records_are_shared_between_endpoints() {
        let (a, b) = InMemoryRelay::pair();

        a.publish_session_keys(vec![SessionKeyRecord {
            session_id: 1,
            user_id: 2,
            conversation_id: 3,
            sealed_key: keyloom_core::keymat::KeyMaterial::SealedForMe(vec![0xAB; 48]),
        }])
        .await
        .unwrap();

        assert!(b.fetch_session_key(1, 2).await.unwrap().is_some());
        assert!(b.fetch_session_key(1, 9).await.unwrap().is_none());
    }
}
