//! Batch trial decryption of viewing keys
//!
//! Blocks carry viewing keys back to back; every one is tried against the
//! owner key and yields a slot in the output, `None` when it is not ours.

use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{NotesError, Result};
use crate::keys::AccountPrivateKey;
use crate::note::DecryptedNote;
use crate::viewing_key::{ViewingKey, VIEWING_KEY_SIZE};

/// Trial-decrypts a batch of viewing keys, keeping input order.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, keys: &[ViewingKey], private_key: &AccountPrivateKey) -> Vec<Option<DecryptedNote>>;

    /// Number of keys processed concurrently.
    fn capacity(&self) -> usize;
}

/// Decrypts on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleDecryptor;

impl Decryptor for SingleDecryptor {
    fn decrypt(&self, keys: &[ViewingKey], private_key: &AccountPrivateKey) -> Vec<Option<DecryptedNote>> {
        keys.iter().map(|k| k.decrypt(private_key)).collect()
    }

    fn capacity(&self) -> usize {
        1
    }
}

/// Decrypts across a dedicated rayon pool.
pub struct PooledDecryptor {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl PooledDecryptor {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("note-decrypt-{i}"))
            .build()
            .map_err(|e| NotesError::ThreadPool(e.to_string()))?;
        Ok(Self { pool, threads })
    }
}

impl Decryptor for PooledDecryptor {
    fn decrypt(&self, keys: &[ViewingKey], private_key: &AccountPrivateKey) -> Vec<Option<DecryptedNote>> {
        // indexed par_iter collects in input order
        self.pool
            .install(|| keys.par_iter().map(|k| k.decrypt(private_key)).collect())
    }

    fn capacity(&self) -> usize {
        self.threads
    }
}

/// Single-threaded for `threads <= 1`, pooled otherwise.
pub fn create_decryptor(threads: usize) -> Result<Arc<dyn Decryptor>> {
    if threads <= 1 {
        Ok(Arc::new(SingleDecryptor))
    } else {
        Ok(Arc::new(PooledDecryptor::new(threads)?))
    }
}

/// Split a concatenated buffer into viewing keys.
pub fn split_viewing_keys(buffer: &[u8]) -> Result<Vec<ViewingKey>> {
    if buffer.len() % VIEWING_KEY_SIZE != 0 {
        return Err(NotesError::InvalidData(format!(
            "viewing key buffer of {} bytes is not a multiple of {VIEWING_KEY_SIZE}",
            buffer.len()
        )));
    }
    buffer.chunks_exact(VIEWING_KEY_SIZE).map(ViewingKey::from_slice).collect()
}

pub fn batch_decrypt_notes(
    buffer: &[u8],
    private_key: &AccountPrivateKey,
    decryptor: &dyn Decryptor,
) -> Result<Vec<Option<DecryptedNote>>> {
    let keys = split_viewing_keys(buffer)?;
    Ok(decryptor.decrypt(&keys, private_key))
}
