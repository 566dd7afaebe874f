//! At-rest value sealing for the persistent backend.
//!
//! Values are CBOR-encoded, then encrypted with XChaCha20-Poly1305 under
//! the storage key (derived from the identity secret). The section name is
//! bound as associated data so a row cannot be replayed into a different
//! table. Layout: `nonce (24) || ciphertext || tag`.

use keyloom_crypto::{NONCE_SIZE, aead};
use rand::RngCore;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::StoreError;

/// Seal a value for storage.
pub(crate) fn seal_value<T: Serialize>(
    storage_key: &[u8; 32],
    section: &str,
    value: &T,
) -> Result<Vec<u8>, StoreError> {
    let mut plaintext = Vec::new();
    ciborium::ser::into_writer(value, &mut plaintext)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = aead::encrypt(&plaintext, storage_key, &nonce, section.as_bytes());

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a stored value.
///
/// # Errors
///
/// `CorruptRow` if the row fails to authenticate or parse; the caller must
/// treat the row as fatal, never as silently absent.
pub(crate) fn open_value<T: DeserializeOwned>(
    storage_key: &[u8; 32],
    section: &str,
    sealed: &[u8],
) -> Result<T, StoreError> {
    if sealed.len() < NONCE_SIZE {
        return Err(StoreError::CorruptRow {
            reason: format!("{section}: sealed row shorter than nonce"),
        });
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&sealed[..NONCE_SIZE]);

    let plaintext = aead::decrypt(&sealed[NONCE_SIZE..], &nonce, storage_key, section.as_bytes())
        .map_err(|e| StoreError::CorruptRow { reason: format!("{section}: {e}") })?;

    ciborium::de::from_reader(plaintext.as_slice())
        .map_err(|e| StoreError::CorruptRow { reason: format!("{section}: {e}") })
}
