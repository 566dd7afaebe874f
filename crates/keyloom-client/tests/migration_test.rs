//! Integration tests for device migration: the full seal-chunk-reassemble
//! round trip, out-of-order chunk arrival, and failure rollback semantics.

use keyloom_client::{
    CryptoWorker, InMemoryRelay, RelayChannel, TokioEnv,
    migration::{
        CHUNK_SIZE, MigrationAnnounce, MigrationChunk, MigrationReceiver, ReceiverPhase,
        send_vault,
    },
    MigrationEvent,
};
use keyloom_core::{
    group::{GroupReceiverState, GroupSenderState},
    session::{BootstrapHeader, PairSession},
};
use keyloom_store::{
    IdentityVault, KeyStore, MemoryStore, SessionKeyRecord, StoreHandle, StoredPreKey,
};

fn store_for(user: u64) -> MemoryStore {
    MemoryStore::open(StoreHandle::for_identity(Some(user)).unwrap())
}

/// Fill a store with at least one row in every section except pre-keys,
/// which is deliberately left empty to prove empty sections clear on import.
async fn populate_old_device(store: &MemoryStore) {
    let (vault, _) =
        IdentityVault::create(b"pw", [0x01; 32], [0x02; 16], [0x03; 24], 1, 1024).unwrap();
    store.put_identity(&vault).await.unwrap();

    let mut session = PairSession::initiator(10, &[0x07; 32]);
    let _ = session.encrypt_next(b"advance", [0x08; 24]).unwrap();
    store.put_pair_session(&session).await.unwrap();

    let mut sender = GroupSenderState::new(20, [0x09; 32]);
    let _ = sender.next_message_key().unwrap();
    store.put_group_sender(&sender).await.unwrap();

    store.put_group_receiver(&GroupReceiverState::new(20, 5, [0x0A; 32], 2)).await.unwrap();

    store
        .put_session_key_records(&[SessionKeyRecord {
            session_id: 30,
            user_id: 1,
            conversation_id: 20,
            sealed_key: keyloom_core::keymat::KeyMaterial::SealedForMe(vec![0x0B; 80]),
        }])
        .await
        .unwrap();

    store
        .put_pending_header(
            11,
            &BootstrapHeader {
                initiator_identity: [0x0C; 32],
                ephemeral_public: [0x0D; 32],
                prekey_id: 4,
            },
        )
        .await
        .unwrap();

    // Enough message keys to force several chunks
    for id in 0..2000u128 {
        store.put_message_key(id, [(id % 251) as u8; 32]).await.unwrap();
    }
}

#[tokio::test]
async fn migration_roundtrip_is_byte_identical() {
    let env = TokioEnv::new();
    let worker = CryptoWorker::spawn();
    let (sender_relay, receiver_relay) = InMemoryRelay::pair();

    let old_device = store_for(1);
    populate_old_device(&old_device).await;

    let new_device = store_for(1);
    // The new device has stale rows that the import must clear
    new_device
        .put_prekey(&StoredPreKey { id: 99, public: [9; 32], secret: [9; 32] })
        .await
        .unwrap();
    new_device.put_message_key(999_999, [0xEE; 32]).await.unwrap();

    let (mut receiver, offer) = MigrationReceiver::begin(&env);
    assert_eq!(receiver.phase(), ReceiverPhase::Waiting);

    let (sent, received) = tokio::join!(
        send_vault(&env, &old_device, &sender_relay, &worker, &offer),
        receiver.run(&new_device, &receiver_relay, &worker),
    );
    sent.unwrap();
    received.unwrap();
    assert_eq!(receiver.phase(), ReceiverPhase::Done);

    let old_snapshot = old_device.export_all().await.unwrap();
    let new_snapshot = new_device.export_all().await.unwrap();
    assert_eq!(
        old_snapshot.to_bytes().unwrap(),
        new_snapshot.to_bytes().unwrap(),
        "every section must match, including the cleared empty ones"
    );

    // The stale rows are gone: empty sections clear, they do not skip
    assert!(new_device.prekey(99).await.unwrap().is_none());
    assert!(new_device.message_key(999_999).await.unwrap().is_none());
}

#[tokio::test]
async fn chunks_arriving_out_of_order_reassemble() {
    let env = TokioEnv::new();
    let worker = CryptoWorker::spawn();
    let (sender_relay, receiver_relay) = InMemoryRelay::pair();

    let old_device = store_for(1);
    populate_old_device(&old_device).await;
    let expected = old_device.export_all().await.unwrap().to_bytes().unwrap();

    let new_device = store_for(1);
    let (mut receiver, offer) = MigrationReceiver::begin(&env);

    // Hand-rolled sender that reverses chunk order before streaming
    let vault_bytes = old_device.export_all().await.unwrap().to_bytes().unwrap();
    let transport_key = [0x42u8; 32];
    let nonce = [0x05u8; 24];
    let ciphertext = worker.seal_vault(vault_bytes, transport_key, nonce).await.unwrap();
    let sealed_key =
        keyloom_crypto::sealed_box::seal(&transport_key, &offer.public_key, [0x06; 32]).unwrap();

    let chunks: Vec<Vec<u8>> = ciphertext.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    assert!(chunks.len() >= 3, "need several chunks to exercise reordering");

    sender_relay
        .send_migration(MigrationEvent::Announce(MigrationAnnounce {
            room_id: offer.room_id,
            total_chunks: chunks.len() as u32,
            sealed_key,
            nonce,
        }))
        .await
        .unwrap();

    for (index, data) in chunks.iter().enumerate().rev() {
        sender_relay
            .send_migration(MigrationEvent::Chunk(MigrationChunk {
                room_id: offer.room_id,
                index: index as u32,
                data: data.clone(),
            }))
            .await
            .unwrap();
    }

    receiver.run(&new_device, &receiver_relay, &worker).await.unwrap();

    assert_eq!(new_device.export_all().await.unwrap().to_bytes().unwrap(), expected);

    // The ack confirms success to the sending side
    let ack = sender_relay.recv_migration().await.unwrap();
    assert!(matches!(ack, MigrationEvent::Ack(a) if a.success));
}

#[tokio::test]
async fn wrong_recipient_key_prevents_any_import() {
    let env = TokioEnv::new();
    let worker = CryptoWorker::spawn();
    let (sender_relay, receiver_relay) = InMemoryRelay::pair();

    let old_device = store_for(1);
    populate_old_device(&old_device).await;

    let new_device = store_for(1);
    new_device.put_message_key(123, [0x11; 32]).await.unwrap();

    let (mut receiver, offer) = MigrationReceiver::begin(&env);

    // Seal the transport key to the WRONG public key: unsealing must fail
    let stranger = keyloom_core::identity::EphemeralKeyPair::from_seed([0x66; 32]);
    let wrong_offer =
        keyloom_client::migration::MigrationOffer {
            room_id: offer.room_id,
            public_key: stranger.public(),
        };

    let (sent, received) = tokio::join!(
        send_vault(&env, &old_device, &sender_relay, &worker, &wrong_offer),
        receiver.run(&new_device, &receiver_relay, &worker),
    );

    assert!(received.is_err(), "receiver must reject an unopenable transport key");
    assert!(sent.is_err(), "sender sees the failure ack");

    // No import happened: the new device's contents are untouched
    assert_eq!(new_device.message_key(123).await.unwrap(), Some([0x11; 32]));
    assert_eq!(new_device.row_count(), 1);
}

#[tokio::test]
async fn empty_vault_still_transfers_and_clears() {
    let env = TokioEnv::new();
    let worker = CryptoWorker::spawn();
    let (sender_relay, receiver_relay) = InMemoryRelay::pair();

    let old_device = store_for(1); // completely empty
    let new_device = store_for(1);
    new_device.put_message_key(5, [0x22; 32]).await.unwrap();

    let (mut receiver, offer) = MigrationReceiver::begin(&env);

    let (sent, received) = tokio::join!(
        send_vault(&env, &old_device, &sender_relay, &worker, &offer),
        receiver.run(&new_device, &receiver_relay, &worker),
    );
    sent.unwrap();
    received.unwrap();

    // Migration can shrink state: the new device is now empty too
    assert_eq!(new_device.row_count(), 0);
    assert!(new_device.export_all().await.unwrap().is_empty());
}
