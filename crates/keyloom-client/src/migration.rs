//! Device-to-device vault migration over an untrusted relay.
//!
//! One-shot transfer of the entire key store from an old device to a new
//! one. The relay only ever sees sealed bytes and chunk indices; the
//! transport key travels sealed to an ephemeral keypair advertised out of
//! band (e.g. rendered as a scannable code).
//!
//! ```text
//! receiver                      relay                      sender
//!    │ ephemeral keypair          │                           │
//!    │ {room, public} ──(out-of-band)──────────────────────>  │
//!    │                            │   export, encrypt, seal   │
//!    │  <───────────── announce {room, chunks, sealed key}    │
//!    │  <───────────── chunk 0, chunk 1, ... (paced)          │
//!    │ reassemble by index        │                           │
//!    │ unseal, decrypt, import    │                           │
//!    │ ack ───────────────────────────────────────────────>   │
//! ```
//!
//! On any failure the receiver's ephemeral material is discarded and the
//! flow restarts from `Waiting` with a fresh keypair; a partial transfer is
//! never resumed. Decryption failure prevents the import call entirely, so
//! a half-imported vault cannot exist.

use std::time::Duration;

use keyloom_core::{env::Environment, identity::EphemeralKeyPair};
use keyloom_crypto::sealed_box;
use keyloom_store::{KeyStore, VaultExport};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use crate::{
    error::ClientError,
    relay::{MigrationEvent, RelayChannel},
    worker::CryptoWorker,
};

/// Fixed chunk size for the ciphertext stream.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Pause between chunks: fixed-rate backpressure so the relay's buffering
/// is never overwhelmed. Not flow-controlled by acknowledgement.
pub const CHUNK_PAUSE: Duration = Duration::from_millis(20);

/// Upper bound on announced chunk counts (1 GiB of ciphertext).
pub const MAX_CHUNKS: u32 = 65_536;

/// Out-of-band advertisement: everything the sender needs to start.
///
/// Carried by a channel assumed readable only by the intended physical
/// device (its security rests on proximity, not cryptography).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOffer {
    /// Random room identifier scoping this transfer on the relay.
    pub room_id: u128,
    /// The receiver's ephemeral public key.
    pub public_key: [u8; 32],
}

/// Transfer parameters announced before the chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationAnnounce {
    /// Transfer room.
    pub room_id: u128,
    /// Number of chunks that will follow.
    pub total_chunks: u32,
    /// Transport key, sealed to the receiver's ephemeral public key.
    pub sealed_key: Vec<u8>,
    /// AEAD nonce for the vault ciphertext.
    pub nonce: [u8; 24],
}

/// One ciphertext chunk, tagged with its sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationChunk {
    /// Transfer room.
    pub room_id: u128,
    /// Position of this chunk in the stream.
    pub index: u32,
    /// Ciphertext bytes.
    pub data: Vec<u8>,
}

/// Receiver's final acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationAck {
    /// Transfer room.
    pub room_id: u128,
    /// Whether the vault was imported.
    pub success: bool,
}

/// Where the receiving side is in the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverPhase {
    /// Offer advertised; nothing received yet.
    Waiting,
    /// Announce seen; buffering chunks by index.
    Receiving,
    /// All chunks present; unsealing and importing.
    Decrypting,
    /// Vault imported and acknowledged.
    Done,
}

/// Export, encrypt, and stream the vault to the device named by the offer.
///
/// Waits for the receiver's acknowledgement; on a failure ack the transport
/// material is already discarded and the caller restarts the whole flow.
pub async fn send_vault<E, S, R>(
    env: &E,
    store: &S,
    relay: &R,
    worker: &CryptoWorker,
    offer: &MigrationOffer,
) -> Result<(), ClientError>
where
    E: Environment,
    S: KeyStore,
    R: RelayChannel,
{
    let vault = store.export_all().await?;
    let plaintext = vault.to_bytes()?;

    let mut transport_key: [u8; 32] = env.random_array();
    let nonce: [u8; 24] = env.random_array();

    // Whole-vault AEAD runs off the control thread
    let ciphertext = worker.seal_vault(plaintext, transport_key, nonce).await?;

    let sealed_key = sealed_box::seal(&transport_key, &offer.public_key, env.random_array())?;
    transport_key.zeroize();

    let total_chunks = ciphertext.len().div_ceil(CHUNK_SIZE) as u32;
    debug!(room = offer.room_id, total_chunks, bytes = ciphertext.len(), "starting transfer");

    relay
        .send_migration(MigrationEvent::Announce(MigrationAnnounce {
            room_id: offer.room_id,
            total_chunks,
            sealed_key,
            nonce,
        }))
        .await?;

    for (index, chunk) in ciphertext.chunks(CHUNK_SIZE).enumerate() {
        relay
            .send_migration(MigrationEvent::Chunk(MigrationChunk {
                room_id: offer.room_id,
                index: index as u32,
                data: chunk.to_vec(),
            }))
            .await?;
        env.sleep(CHUNK_PAUSE).await;
    }

    // Wait for the receiver's verdict
    loop {
        match relay.recv_migration().await? {
            MigrationEvent::Ack(ack) if ack.room_id == offer.room_id => {
                return if ack.success {
                    Ok(())
                } else {
                    Err(ClientError::MigrationFailed {
                        reason: "receiver reported failure".to_string(),
                    })
                };
            },
            _ => {},
        }
    }
}

/// The receiving side of a migration.
///
/// Created fresh per attempt; dropping it discards the ephemeral secret.
/// After a failed [`run`](Self::run) the flow restarts from a new
/// [`begin`](Self::begin) - partial transfers are never resumed.
pub struct MigrationReceiver {
    room_id: u128,
    ephemeral: EphemeralKeyPair,
    phase: ReceiverPhase,
}

impl MigrationReceiver {
    /// Generate ephemeral material and the offer to advertise out of band.
    pub fn begin<E: Environment>(env: &E) -> (Self, MigrationOffer) {
        let ephemeral = EphemeralKeyPair::from_seed(env.random_array());
        let room_id = env.random_u128();
        let offer = MigrationOffer { room_id, public_key: ephemeral.public() };

        (Self { room_id, ephemeral, phase: ReceiverPhase::Waiting }, offer)
    }

    /// Current phase.
    pub fn phase(&self) -> ReceiverPhase {
        self.phase
    }

    /// Drive the transfer to completion: buffer chunks, decrypt, import.
    ///
    /// On success the store's contents have been replaced by the sender's
    /// snapshot and a success ack was sent. On failure a failure ack is
    /// sent, no import has happened, and the caller restarts with a fresh
    /// receiver.
    pub async fn run<S, R>(
        &mut self,
        store: &S,
        relay: &R,
        worker: &CryptoWorker,
    ) -> Result<(), ClientError>
    where
        S: KeyStore,
        R: RelayChannel,
    {
        match self.transfer(store, relay, worker).await {
            Ok(()) => {
                self.phase = ReceiverPhase::Done;
                relay
                    .send_migration(MigrationEvent::Ack(MigrationAck {
                        room_id: self.room_id,
                        success: true,
                    }))
                    .await?;
                Ok(())
            },
            Err(err) => {
                // Best effort; the sender also fails on a dead channel
                let _ = relay
                    .send_migration(MigrationEvent::Ack(MigrationAck {
                        room_id: self.room_id,
                        success: false,
                    }))
                    .await;
                Err(err)
            },
        }
    }

    async fn transfer<S, R>(
        &mut self,
        store: &S,
        relay: &R,
        worker: &CryptoWorker,
    ) -> Result<(), ClientError>
    where
        S: KeyStore,
        R: RelayChannel,
    {
        // Wait for this room's announce, ignoring unrelated traffic
        let announce = loop {
            if let MigrationEvent::Announce(announce) = relay.recv_migration().await? {
                if announce.room_id == self.room_id {
                    break announce;
                }
            }
        };

        if announce.total_chunks == 0 || announce.total_chunks > MAX_CHUNKS {
            return Err(ClientError::MigrationFailed {
                reason: format!("announced {} chunks", announce.total_chunks),
            });
        }

        self.phase = ReceiverPhase::Receiving;

        // Pre-sized buffer, slotted by index: out-of-order arrival tolerated
        let total = announce.total_chunks as usize;
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut received = 0usize;

        while received < total {
            match relay.recv_migration().await? {
                MigrationEvent::Chunk(chunk) if chunk.room_id == self.room_id => {
                    let index = chunk.index as usize;
                    if index >= total {
                        return Err(ClientError::MigrationFailed {
                            reason: format!("chunk index {index} out of range"),
                        });
                    }
                    if slots[index].is_none() {
                        slots[index] = Some(chunk.data);
                        received += 1;
                    }
                },
                _ => {},
            }
        }

        self.phase = ReceiverPhase::Decrypting;

        let mut ciphertext = Vec::new();
        for slot in slots {
            // Every index 0..total is present once the count matched
            if let Some(data) = slot {
                ciphertext.extend_from_slice(&data);
            }
        }

        let mut key_bytes = sealed_box::open(
            &announce.sealed_key,
            &self.ephemeral.public(),
            &self.ephemeral.secret_bytes(),
        )
        .map_err(|e| ClientError::MigrationFailed {
            reason: format!("transport key failed to unseal: {e}"),
        })?;

        if key_bytes.len() != 32 {
            key_bytes.zeroize();
            return Err(ClientError::MigrationFailed {
                reason: "transport key has the wrong length".to_string(),
            });
        }
        let mut transport_key = [0u8; 32];
        transport_key.copy_from_slice(&key_bytes);
        key_bytes.zeroize();

        // Whole-vault decryption runs off the control thread. Failure here
        // aborts before any import call, so no section is ever half-cleared
        let plaintext = worker
            .open_vault(ciphertext, transport_key, announce.nonce)
            .await
            .map_err(|e| ClientError::MigrationFailed {
                reason: format!("vault failed to decrypt: {e}"),
            })?;
        transport_key.zeroize();

        let vault = VaultExport::from_bytes(&plaintext).map_err(|e| {
            ClientError::MigrationFailed { reason: format!("vault failed to parse: {e}") }
        })?;

        store.import_all(&vault).await?;

        debug!(room = self.room_id, rows = vault.row_count(), "vault imported");
        Ok(())
    }
}
