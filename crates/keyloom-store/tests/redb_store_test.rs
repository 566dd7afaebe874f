//! Integration tests for the durable backend: persistence across reopen,
//! at-rest opacity, identity isolation, and bulk-operation semantics.

use keyloom_core::{
    group::{GroupReceiverState, GroupSenderState},
    session::{BootstrapHeader, PairSession},
};
use keyloom_store::{
    IdentityVault, KeyStore, MemoryStore, RedbStore, SessionKeyRecord, StoreHandle, StoredPreKey,
    storage_key_for,
};

fn handle(identity: u64) -> StoreHandle {
    StoreHandle::for_identity(Some(identity)).unwrap()
}

fn storage_key() -> [u8; 32] {
    let identity = keyloom_core::identity::IdentityKeyPair::from_seed([0x42; 32]);
    storage_key_for(&identity)
}

async fn populate(store: &impl KeyStore) {
    let (vault, _) =
        IdentityVault::create(b"pw", [0x01; 32], [0x02; 16], [0x03; 24], 1, 1024).unwrap();
    store.put_identity(&vault).await.unwrap();

    for id in 0..3u32 {
        store
            .put_prekey(&StoredPreKey { id, public: [id as u8; 32], secret: [id as u8 + 1; 32] })
            .await
            .unwrap();
    }

    let mut session = PairSession::initiator(10, &[0x07; 32]);
    let _ = session.encrypt_next(b"advance once", [0x08; 24]).unwrap();
    store.put_pair_session(&session).await.unwrap();

    let mut sender = GroupSenderState::new(20, [0x09; 32]);
    let _ = sender.next_message_key().unwrap();
    store.put_group_sender(&sender).await.unwrap();

    store
        .put_group_receiver(&GroupReceiverState::new(20, 5, [0x0A; 32], 0))
        .await
        .unwrap();

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
            10,
            &BootstrapHeader {
                initiator_identity: [0x0C; 32],
                ephemeral_public: [0x0D; 32],
                prekey_id: 1,
            },
        )
        .await
        .unwrap();

    store.put_message_key(40, [0x0E; 32]).await.unwrap();
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.redb");
    let key = storage_key();

    {
        let store = RedbStore::open(&path, handle(1), key).unwrap();
        populate(&store).await;
    }

    let reopened = RedbStore::open(&path, handle(1), key).unwrap();

    assert!(reopened.identity().await.unwrap().is_some());
    assert_eq!(reopened.highest_prekey_id().await.unwrap(), Some(2));

    let session = reopened.pair_session(10).await.unwrap().unwrap();
    assert_eq!(session.send_counter(), 1);

    let sender = reopened.group_sender(20).await.unwrap().unwrap();
    assert_eq!(sender.counter(), 1);

    assert!(reopened.group_receiver(20, 5).await.unwrap().is_some());
    assert!(reopened.session_key_record(30, 1).await.unwrap().is_some());
    assert_eq!(reopened.message_key(40).await.unwrap(), Some([0x0E; 32]));
}

#[tokio::test]
async fn wrong_storage_key_cannot_open_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.redb");

    {
        let store = RedbStore::open(&path, handle(1), storage_key()).unwrap();
        store.put_message_key(1, [0x55; 32]).await.unwrap();
    }

    let wrong = RedbStore::open(&path, handle(1), [0xEE; 32]).unwrap();
    let result = wrong.message_key(1).await;
    assert!(result.is_err(), "row under a different storage key must be corrupt, not absent");
}

#[tokio::test]
async fn identities_are_isolated_in_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.redb");
    let key = storage_key();

    let store_a = RedbStore::open(&path, handle(1), key).unwrap();
    let store_b = store_a.with_handle(handle(2), key);

    store_a.put_message_key(1, [0xAA; 32]).await.unwrap();

    assert!(store_b.message_key(1).await.unwrap().is_none());

    // Wiping B leaves A untouched
    store_b.wipe().await.unwrap();
    assert_eq!(store_a.message_key(1).await.unwrap(), Some([0xAA; 32]));
}

#[tokio::test]
async fn database_file_does_not_leak_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.redb");

    let marker = [0xC7u8; 32];
    {
        let store = RedbStore::open(&path, handle(1), storage_key()).unwrap();
        store.put_message_key(1, marker).await.unwrap();
    }

    let raw = std::fs::read(&path).unwrap();
    assert!(
        !raw.windows(marker.len()).any(|w| w == marker),
        "message key bytes must not appear in the database file"
    );
}

#[tokio::test]
async fn wipe_clears_everything_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.redb");

    let store = RedbStore::open(&path, handle(1), storage_key()).unwrap();
    populate(&store).await;

    store.wipe().await.unwrap();

    assert!(store.identity().await.unwrap().is_none());
    assert!(store.prekey(0).await.unwrap().is_none());
    assert!(store.pair_session(10).await.unwrap().is_none());
    assert!(store.group_sender(20).await.unwrap().is_none());
    assert!(store.message_key(40).await.unwrap().is_none());

    // Wiping again is a no-op
    store.wipe().await.unwrap();
    assert!(store.export_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn export_matches_between_backends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.redb");

    let durable = RedbStore::open(&path, handle(1), storage_key()).unwrap();
    let memory = MemoryStore::open(handle(1));

    populate(&durable).await;
    populate(&memory).await;

    let from_durable = durable.export_all().await.unwrap();
    let from_memory = memory.export_all().await.unwrap();

    assert_eq!(
        from_durable.to_bytes().unwrap(),
        from_memory.to_bytes().unwrap(),
        "both backends must snapshot identical contents identically"
    );
}

#[tokio::test]
async fn import_shrinks_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.redb");

    let store = RedbStore::open(&path, handle(1), storage_key()).unwrap();
    populate(&store).await;

    // Import a snapshot with a single section populated
    let mut small = keyloom_store::VaultExport::default();
    small.message_keys.push((99, [0x77; 32]));
    store.import_all(&small).await.unwrap();

    let exported = store.export_all().await.unwrap();
    assert_eq!(exported.row_count(), 1);
    assert_eq!(store.message_key(99).await.unwrap(), Some([0x77; 32]));
    assert!(store.identity().await.unwrap().is_none());
    assert!(store.prekey(0).await.unwrap().is_none());
}
