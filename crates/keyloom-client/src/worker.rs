//! Crypto worker proxy: heavy operations off the control thread.
//!
//! Multi-hundred-millisecond derivations and whole-vault AEAD passes must
//! not block message rendering or input handling. The proxy submits work to
//! blocking threads and correlates replies by request id in a table it owns.
//!
//! Cancellation drops the caller's reply receiver; the worker finishes the
//! computation, finds the slot gone, and discards the result. In-flight
//! work is never aborted mid-computation.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use keyloom_crypto::{CryptoError, aead, kdf};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::ClientError;

/// Work submitted to the blocking pool.
enum WorkerTask {
    DerivePasswordKey { password: Vec<u8>, salt: Vec<u8>, ops_cost: u32, mem_cost_kib: u32 },
    SealVault { plaintext: Vec<u8>, key: [u8; 32], nonce: [u8; 24] },
    OpenVault { ciphertext: Vec<u8>, key: [u8; 32], nonce: [u8; 24] },
}

/// A computed result on its way back to the caller.
enum WorkerOutput {
    Key([u8; 32]),
    Bytes(Vec<u8>),
}

struct WorkerRequest {
    id: u64,
    task: WorkerTask,
}

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<WorkerOutput, CryptoError>>>>>;

/// Proxy to the crypto worker pool.
///
/// Clone is cheap; clones share the worker and its correlation table.
#[derive(Clone)]
pub struct CryptoWorker {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    pending: PendingTable,
    next_id: Arc<AtomicU64>,
}

impl CryptoWorker {
    /// Spawn the worker loop onto the current runtime.
    pub fn spawn() -> Self {
        let (requests, mut receiver) = mpsc::unbounded_channel::<WorkerRequest>();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let table = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let table = Arc::clone(&table);
                tokio::spawn(async move {
                    let WorkerRequest { id, task } = request;
                    let result = tokio::task::spawn_blocking(move || run_task(task)).await;

                    let slot = lock_pending(&table).remove(&id);
                    if let Some(reply) = slot {
                        match result {
                            // Caller may be gone (cancelled); discard quietly
                            Ok(output) => drop(reply.send(output)),
                            Err(_) => debug!(id, "worker task panicked; dropping reply slot"),
                        }
                    }
                });
            }
        });

        Self { requests, pending, next_id: Arc::new(AtomicU64::new(0)) }
    }

    /// Number of requests awaiting replies. Useful in tests.
    pub fn pending_len(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Derive a password key off-thread (Argon2id).
    pub async fn derive_password_key(
        &self,
        password: Vec<u8>,
        salt: Vec<u8>,
        ops_cost: u32,
        mem_cost_kib: u32,
    ) -> Result<[u8; 32], ClientError> {
        let output = self
            .submit(WorkerTask::DerivePasswordKey { password, salt, ops_cost, mem_cost_kib })
            .await?;
        match output {
            WorkerOutput::Key(key) => Ok(key),
            WorkerOutput::Bytes(_) => Err(ClientError::WorkerClosed),
        }
    }

    /// Encrypt a whole vault snapshot off-thread.
    pub async fn seal_vault(
        &self,
        plaintext: Vec<u8>,
        key: [u8; 32],
        nonce: [u8; 24],
    ) -> Result<Vec<u8>, ClientError> {
        let output = self.submit(WorkerTask::SealVault { plaintext, key, nonce }).await?;
        match output {
            WorkerOutput::Bytes(bytes) => Ok(bytes),
            WorkerOutput::Key(_) => Err(ClientError::WorkerClosed),
        }
    }

    /// Decrypt a whole vault snapshot off-thread.
    pub async fn open_vault(
        &self,
        ciphertext: Vec<u8>,
        key: [u8; 32],
        nonce: [u8; 24],
    ) -> Result<Vec<u8>, ClientError> {
        let output = self.submit(WorkerTask::OpenVault { ciphertext, key, nonce }).await?;
        match output {
            WorkerOutput::Bytes(bytes) => Ok(bytes),
            WorkerOutput::Key(_) => Err(ClientError::WorkerClosed),
        }
    }

    async fn submit(&self, task: WorkerTask) -> Result<WorkerOutput, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();

        lock_pending(&self.pending).insert(id, reply);

        if self.requests.send(WorkerRequest { id, task }).is_err() {
            lock_pending(&self.pending).remove(&id);
            return Err(ClientError::WorkerClosed);
        }

        let result = receiver.await.map_err(|_| ClientError::WorkerClosed)?;
        result.map_err(ClientError::from)
    }
}

#[allow(clippy::expect_used)]
fn lock_pending(
    table: &PendingTable,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<WorkerOutput, CryptoError>>>> {
    table.lock().expect("Mutex poisoned")
}

fn run_task(task: WorkerTask) -> Result<WorkerOutput, CryptoError> {
    match task {
        WorkerTask::DerivePasswordKey { password, salt, ops_cost, mem_cost_kib } => {
            let key = kdf::derive_key_from_password(&password, &salt, ops_cost, mem_cost_kib)?;
            Ok(WorkerOutput::Key(key))
        },
        WorkerTask::SealVault { plaintext, key, nonce } => {
            Ok(WorkerOutput::Bytes(aead::encrypt(&plaintext, &key, &nonce, b"vault")))
        },
        WorkerTask::OpenVault { ciphertext, key, nonce } => {
            Ok(WorkerOutput::Bytes(aead::decrypt(&ciphertext, &nonce, &key, b"vault")?))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn derive_roundtrips_through_the_worker() {
        let worker = CryptoWorker::spawn();

        let via_worker = worker
            .derive_password_key(b"pw".to_vec(), b"0123456789abcdef".to_vec(), 1, 1024)
            .await
            .unwrap();
        let direct = kdf::derive_key_from_password(b"pw", b"0123456789abcdef", 1, 1024).unwrap();

        assert_eq!(via_worker, direct);
        assert_eq!(worker.pending_len(), 0, "slot cleared after reply");
    }

    #[tokio::test]
    async fn seal_and_open_vault_roundtrip() {
        let worker = CryptoWorker::spawn();
        let key = [0x42; 32];
        let nonce = [0x07; 24];
        let vault_bytes = vec![0xAB; 4096];

        let sealed = worker.seal_vault(vault_bytes.clone(), key, nonce).await.unwrap();
        let opened = worker.open_vault(sealed, key, nonce).await.unwrap();

        assert_eq!(opened, vault_bytes);
    }

    #[tokio::test]
    async fn tampered_vault_fails_through_the_worker() {
        let worker = CryptoWorker::spawn();
        let key = [0x42; 32];
        let nonce = [0x07; 24];

        let mut sealed = worker.seal_vault(vec![1, 2, 3], key, nonce).await.unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;

        let result = worker.open_vault(sealed, key, nonce).await;
        assert!(matches!(result, Err(ClientError::Crypto(_))));
    }

    #[tokio::test]
    async fn concurrent_requests_correlate_correctly() {
        let worker = CryptoWorker::spawn();

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let worker = worker.clone();
            handles.push(tokio::spawn(async move {
                let key = [i; 32];
                let nonce = [i; 24];
                let sealed = worker.seal_vault(vec![i; 100], key, nonce).await.unwrap();
                let opened = worker.open_vault(sealed, key, nonce).await.unwrap();
                assert_eq!(opened, vec![i; 100]);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(worker.pending_len(), 0);
    }
}
