use std::{hash::Hash, sync::Arc};

use dashmap::DashMap;
use rand::{thread_rng, Rng};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lowercase letters and digits, without the ones that are easy to confuse
const JOIN_CODE_ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";

pub fn random_join_code(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .take(length)
        .collect()
}

/// A set of async mutexes, one per key, created on first use.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Waits until the critical section for the key is free
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops the lock of a key. Holders of a guard are unaffected.
    pub fn forget(&self, key: &K) {
        self.locks.remove(key);
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            locks: Default::default(),
        }
    }
}
