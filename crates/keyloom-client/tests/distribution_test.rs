//! Integration tests for session key distribution: completeness, atomic
//! failure, and the fan-out/unseal round trip.

use keyloom_client::{
    InMemoryDirectory, InMemoryRelay, TokioEnv,
    distribution::{accept_group_key, distribute_group_key},
    error::ClientError,
};
use keyloom_core::identity::IdentityKeyPair;
use keyloom_crypto::sealed_box;
use keyloom_store::{KeyStore, MemoryStore, StoreHandle};

const CONV: u128 = 77;
const ALICE: u64 = 1;
const BOB: u64 = 2;
const CAROL: u64 = 3;

fn store_for(user: u64) -> MemoryStore {
    MemoryStore::open(StoreHandle::for_identity(Some(user)).unwrap())
}

fn identity(seed: u8) -> IdentityKeyPair {
    IdentityKeyPair::from_seed([seed; 32])
}

async fn directory_with_all_keys(
    alice: &IdentityKeyPair,
    bob: &IdentityKeyPair,
    carol: &IdentityKeyPair,
) -> InMemoryDirectory {
    use keyloom_client::IdentityDirectory;

    let directory = InMemoryDirectory::new();
    directory.set_participants(CONV, vec![ALICE, BOB, CAROL]);
    directory.publish_identity(ALICE, alice.public().to_vec()).await.unwrap();
    directory.publish_identity(BOB, bob.public().to_vec()).await.unwrap();
    directory.publish_identity(CAROL, carol.public().to_vec()).await.unwrap();
    directory
}

#[tokio::test]
async fn full_participant_set_gets_one_record_each() {
    let env = TokioEnv::new();
    let (relay, _peer) = InMemoryRelay::pair();
    let store = store_for(ALICE);

    let alice = identity(0x01);
    let bob = identity(0x02);
    let carol = identity(0x03);
    let directory = directory_with_all_keys(&alice, &bob, &carol).await;

    let outcome =
        distribute_group_key(&env, &store, &directory, &relay, CONV, ALICE).await.unwrap();

    assert_eq!(outcome.keyed, 3);
    assert_eq!(relay.record_count(), 3, "exactly one record per participant");

    // Every record shares the session id and unseals to the same raw key
    use keyloom_client::RelayChannel;
    use keyloom_core::keymat::KeyMaterial;
    let mut raw_keys = Vec::new();
    for (user, keypair) in [(ALICE, &alice), (BOB, &bob), (CAROL, &carol)] {
        let record = relay.fetch_session_key(outcome.session_id, user).await.unwrap().unwrap();
        assert_eq!(record.session_id, outcome.session_id);
        assert_eq!(record.conversation_id, CONV);

        let KeyMaterial::SealedForMe(sealed) = &record.sealed_key else {
            panic!("records travel sealed, never raw");
        };
        let raw =
            sealed_box::open(sealed, &keypair.public(), &keypair.secret_bytes()).unwrap();
        raw_keys.push(raw);
    }
    assert_eq!(raw_keys[0], raw_keys[1]);
    assert_eq!(raw_keys[1], raw_keys[2]);

    // Initiator can encrypt immediately: its sender chain is installed
    assert!(store.group_sender(CONV).await.unwrap().is_some());
    assert_eq!(outcome.own_record.user_id, ALICE);
}

#[tokio::test]
async fn missing_key_aborts_with_zero_records() {
    let env = TokioEnv::new();
    let (relay, _peer) = InMemoryRelay::pair();
    let store = store_for(ALICE);

    let alice = identity(0x01);
    let bob = identity(0x02);

    use keyloom_client::IdentityDirectory;
    let directory = InMemoryDirectory::new();
    directory.set_participants(CONV, vec![ALICE, BOB, CAROL]);
    directory.publish_identity(ALICE, alice.public().to_vec()).await.unwrap();
    directory.publish_identity(BOB, bob.public().to_vec()).await.unwrap();
    // Carol never published a key

    let result = distribute_group_key(&env, &store, &directory, &relay, CONV, ALICE).await;

    match result {
        Err(ClientError::IncompleteDistribution { missing }) => {
            assert_eq!(missing, vec![CAROL], "the unkeyed member is named");
        },
        other => panic!("expected IncompleteDistribution, got {other:?}"),
    }

    assert_eq!(relay.record_count(), 0, "no partial record set persisted");
    assert!(store.group_sender(CONV).await.unwrap().is_none(), "no sender chain installed");
}

#[tokio::test]
async fn malformed_key_is_a_hard_failure() {
    let env = TokioEnv::new();
    let (relay, _peer) = InMemoryRelay::pair();
    let store = store_for(ALICE);

    let alice = identity(0x01);
    let bob = identity(0x02);

    use keyloom_client::IdentityDirectory;
    let directory = InMemoryDirectory::new();
    directory.set_participants(CONV, vec![ALICE, BOB, CAROL]);
    directory.publish_identity(ALICE, alice.public().to_vec()).await.unwrap();
    directory.publish_identity(BOB, bob.public().to_vec()).await.unwrap();
    directory.publish_identity(CAROL, vec![0xAB; 31]).await.unwrap(); // truncated

    let result = distribute_group_key(&env, &store, &directory, &relay, CONV, ALICE).await;

    match result {
        Err(ClientError::CorruptKeyMaterial { user_id, .. }) => {
            assert_eq!(user_id, Some(CAROL));
        },
        other => panic!("expected CorruptKeyMaterial, got {other:?}"),
    }

    assert_eq!(relay.record_count(), 0, "malformed keys are not skipped over");
}

#[tokio::test]
async fn receivers_install_and_decrypt() {
    let env = TokioEnv::new();
    let (relay, _peer) = InMemoryRelay::pair();

    let alice_store = store_for(ALICE);
    let bob_store = store_for(BOB);

    let alice = identity(0x01);
    let bob = identity(0x02);
    let carol = identity(0x03);
    let directory = directory_with_all_keys(&alice, &bob, &carol).await;

    let outcome =
        distribute_group_key(&env, &alice_store, &directory, &relay, CONV, ALICE).await.unwrap();

    // Bob fetches and installs his copy
    let installed =
        accept_group_key(&bob_store, &relay, &bob, outcome.session_id, BOB, ALICE).await.unwrap();
    assert!(installed);
    assert!(bob_store.group_receiver(CONV, ALICE).await.unwrap().is_some());

    // A user with no record yet stays in the waiting state
    let not_yet = accept_group_key(&bob_store, &relay, &bob, 999, BOB, ALICE).await.unwrap();
    assert!(!not_yet);

    // Alice encrypts with her new chain; Bob decrypts with his installed one
    let mut sender = alice_store.group_sender(CONV).await.unwrap().unwrap();
    let message =
        keyloom_core::group::encrypt_group_message(&mut sender, ALICE, b"hello group", [7; 12])
            .unwrap();

    let mut receiver = bob_store.group_receiver(CONV, ALICE).await.unwrap().unwrap();
    let plaintext = keyloom_core::group::decrypt_group_message(&mut receiver, &message).unwrap();
    assert_eq!(plaintext, b"hello group");
}

#[tokio::test]
async fn redistribution_rotates_the_sender_chain() {
    let env = TokioEnv::new();
    let (relay, _peer) = InMemoryRelay::pair();
    let store = store_for(ALICE);

    let alice = identity(0x01);
    let bob = identity(0x02);
    let carol = identity(0x03);
    let directory = directory_with_all_keys(&alice, &bob, &carol).await;

    let first = distribute_group_key(&env, &store, &directory, &relay, CONV, ALICE).await.unwrap();
    let second =
        distribute_group_key(&env, &store, &directory, &relay, CONV, ALICE).await.unwrap();

    assert_ne!(first.session_id, second.session_id);

    // The installed chain is the fresh one: its counter restarted at zero
    let sender = store.group_sender(CONV).await.unwrap().unwrap();
    assert_eq!(sender.counter(), 0);

    // Both distributions' records remain fetchable (rotation is additive)
    assert_eq!(relay.record_count(), 6);
}
