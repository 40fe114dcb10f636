//! Per-key async mutual exclusion.
//!
//! Callers working on the same key run one after another while different keys
//! proceed in parallel. Entries are kept as weak references and removed by the
//! last guard to leave, so the map only ever holds keys that are in use.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

type LockMap<K> = DashMap<K, Weak<Mutex<()>>>;

/// Guard returned by [`KeyedAsyncLock::lock`]; releases the key on drop.
pub struct KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    guard: Option<OwnedMutexGuard<()>>,
    mutex: Arc<Mutex<()>>,
    key: K,
    locks: Arc<LockMap<K>>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());

        // Checked under the shard lock so a concurrent `mutex_for` cannot
        // upgrade the entry between the count and the removal.
        let mutex = &self.mutex;
        self.locks.remove_if(&self.key, |_, weak| {
            Arc::strong_count(mutex) == 1 && weak.ptr_eq(&Arc::downgrade(mutex))
        });
    }
}

/// Serializes async work per key.
pub struct KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    locks: Arc<LockMap<K>>,
}

impl<K> KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits until no other guard holds `key`, then takes it.
    pub async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let mutex = self.mutex_for(key);
        let guard = Arc::clone(&mutex).lock_owned().await;

        KeyedLockGuard {
            guard: Some(guard),
            mutex,
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Takes `key` only if it is free right now.
    pub fn try_lock(&self, key: &K) -> Option<KeyedLockGuard<K>> {
        let mutex = self.mutex_for(key);
        let guard = Arc::clone(&mutex).try_lock_owned().ok()?;

        Some(KeyedLockGuard {
            guard: Some(guard),
            mutex,
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        })
    }

    fn mutex_for(&self, key: &K) -> Arc<Mutex<()>> {
        match self.locks.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get().upgrade() {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(Mutex::new(()));
                    occupied.insert(Arc::downgrade(&mutex));
                    mutex
                }
            },
            Entry::Vacant(vacant) => {
                let mutex = Arc::new(Mutex::new(()));
                vacant.insert(Arc::downgrade(&mutex));
                mutex
            }
        }
    }
}

impl<K> Default for KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
