//! Session key distribution: sealed fan-out of a fresh group key.
//!
//! A freshly generated chain seed is sealed individually under every
//! participant's public key and published as opaque blobs keyed by
//! (session, user). Each client fetches and unseals only its own blob.
//!
//! # All-or-nothing
//!
//! If any participant lacks a usable public key the whole distribution
//! aborts with zero records persisted: a partially keyed group would
//! silently exclude a member from future decryption.

use keyloom_core::{
    ConversationId, SessionId, UserId,
    env::Environment,
    group::{GroupReceiverState, GroupSenderState},
    identity::{IdentityKeyPair, parse_public_key},
    keymat::KeyMaterial,
};
use keyloom_crypto::sealed_box;
use keyloom_store::{KeyStore, SessionKeyRecord};
use tracing::debug;
use zeroize::Zeroize;

use crate::{error::ClientError, directory::IdentityDirectory, relay::RelayChannel};

/// What a completed distribution hands back to the initiator.
///
/// Only the initiator's own sealed record is returned (it already knows the
/// raw key), so it can begin encrypting immediately without a round trip.
#[derive(Debug)]
pub struct DistributionOutcome {
    /// Identifier shared by every record of this distribution.
    pub session_id: SessionId,
    /// Number of participants keyed.
    pub keyed: usize,
    /// The initiator's own sealed record.
    pub own_record: SessionKeyRecord,
}

/// Generate and fan out a fresh group key for a conversation.
///
/// Installs the new sender chain locally (replacing any previous one, which
/// is how rotation works) and publishes one sealed record per participant.
///
/// # Errors
///
/// - `IncompleteDistribution` naming every participant without a published
///   key; nothing is persisted
/// - `CorruptKeyMaterial` naming the participant whose key was malformed;
///   nothing is persisted
pub async fn distribute_group_key<E, S, D, R>(
    env: &E,
    store: &S,
    directory: &D,
    relay: &R,
    conversation: ConversationId,
    initiator: UserId,
) -> Result<DistributionOutcome, ClientError>
where
    E: Environment,
    S: KeyStore,
    D: IdentityDirectory,
    R: RelayChannel,
{
    let mut chain_seed: [u8; 32] = env.random_array();
    let session_id: SessionId = env.random_u128();

    let participants = directory.participants(conversation).await?;

    // Resolve every key before sealing anything
    let mut resolved = Vec::with_capacity(participants.len());
    let mut missing = Vec::new();
    for &user in &participants {
        match directory.published_key(user).await? {
            Some(raw) => {
                let key = parse_public_key(&raw).map_err(|e| ClientError::CorruptKeyMaterial {
                    user_id: Some(user),
                    reason: e.to_string(),
                })?;
                resolved.push((user, key));
            },
            None => missing.push(user),
        }
    }

    if !missing.is_empty() {
        chain_seed.zeroize();
        return Err(ClientError::IncompleteDistribution { missing });
    }

    let mut records = Vec::with_capacity(resolved.len());
    for (user, public_key) in &resolved {
        let sealed = sealed_box::seal(&chain_seed, public_key, env.random_array())
            .map_err(|e| ClientError::CorruptKeyMaterial {
                user_id: Some(*user),
                reason: e.to_string(),
            })?;
        records.push(SessionKeyRecord {
            session_id,
            user_id: *user,
            conversation_id: conversation,
            sealed_key: KeyMaterial::SealedForMe(sealed),
        });
    }

    // The record set covers the full participant set; persist atomically
    relay.publish_session_keys(records.clone()).await?;

    let own_record = records
        .iter()
        .find(|record| record.user_id == initiator)
        .cloned()
        .ok_or(ClientError::IncompleteDistribution { missing: vec![initiator] })?;

    // Initiator installs the new chain: an existing one is rotated in
    // place, which never touches peer receiver states
    let sender = match store.group_sender(conversation).await? {
        Some(mut existing) => {
            existing.rotate(chain_seed);
            existing
        },
        None => GroupSenderState::new(conversation, chain_seed),
    };
    store.put_group_sender(&sender).await?;
    store.put_session_key_records(std::slice::from_ref(&own_record)).await?;
    chain_seed.zeroize();

    debug!(conversation, session = session_id, keyed = records.len(), "distributed group key");

    Ok(DistributionOutcome { session_id, keyed: records.len(), own_record })
}

/// Fetch and install a distributed group key on the receiving side.
///
/// Unseals this user's own record with the identity keypair and installs a
/// receiver chain for the distributing member, starting at counter 0.
///
/// Returns `Ok(false)` when no record is addressed to this user yet (key
/// delivery is eventually consistent; callers keep the "waiting" state).
pub async fn accept_group_key<S, R>(
    store: &S,
    relay: &R,
    identity: &IdentityKeyPair,
    session: SessionId,
    me: UserId,
    distributor: UserId,
) -> Result<bool, ClientError>
where
    S: KeyStore,
    R: RelayChannel,
{
    let Some(record) = relay.fetch_session_key(session, me).await? else {
        return Ok(false);
    };

    let mut seed_bytes = match &record.sealed_key {
        KeyMaterial::SealedForMe(sealed) => {
            sealed_box::open(sealed, &identity.public(), &identity.secret_bytes()).map_err(
                |e| ClientError::CorruptKeyMaterial { user_id: Some(me), reason: e.to_string() },
            )?
        },
        KeyMaterial::Raw(raw) => raw.clone(),
        KeyMaterial::AwaitingKey => return Ok(false),
    };

    if seed_bytes.len() != 32 {
        seed_bytes.zeroize();
        return Err(ClientError::CorruptKeyMaterial {
            user_id: Some(me),
            reason: format!("distributed key must be 32 bytes, got {}", seed_bytes.len()),
        });
    }

    let mut chain_seed = [0u8; 32];
    chain_seed.copy_from_slice(&seed_bytes);
    seed_bytes.zeroize();

    let receiver =
        GroupReceiverState::new(record.conversation_id, distributor, chain_seed, 0);
    chain_seed.zeroize();

    store.put_group_receiver(&receiver).await?;
    store.put_session_key_records(std::slice::from_ref(&record)).await?;

    debug!(
        conversation = record.conversation_id,
        session, distributor, "installed distributed group key"
    );
    Ok(true)
}
