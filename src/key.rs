//! Key labelling and the per-key mutation lock table.

use crate::entity::Resource;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Builder for key labels used in logs and metrics.
pub struct KeyLabel;

impl KeyLabel {
    /// Build the label of a key: `"{kind}:{key}"`.
    pub fn build<T: Resource>(key: &T::Key) -> String {
        format!("{}:{}", T::resource_kind(), key)
    }

    /// Label for an operation that has no key yet (create) or spans the
    /// whole collection (fetch).
    pub fn collection<T: Resource>() -> String {
        format!("{}:*", T::resource_kind())
    }
}

/// Table of async locks, one per key with a mutation in flight.
///
/// A second mutation on the same key waits for the first to resolve (commit or
/// rollback) before it applies its own optimistic change. Mutations on different
/// keys never contend. Entries are dropped once nobody holds or waits on them.
pub(crate) struct KeyLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> KeyLocks<K>
where
    K: Eq + std::hash::Hash + Clone,
{
    pub(crate) fn new() -> Self {
        KeyLocks {
            locks: DashMap::new(),
        }
    }

    /// Wait until `key` is free and take it.
    pub(crate) async fn acquire(&self, key: &K) -> KeyGuard<'_, K> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;

        KeyGuard {
            table: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Whether a mutation currently holds or waits on `key`.
    pub(crate) fn is_busy(&self, key: &K) -> bool {
        self.locks.contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }

    fn release(&self, key: &K) {
        // Only the table's own Arc left: no holder, no waiter.
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Held for the duration of one mutation on one key.
pub(crate) struct KeyGuard<'a, K>
where
    K: Eq + std::hash::Hash + Clone,
{
    table: &'a KeyLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyGuard<'_, K>
where
    K: Eq + std::hash::Hash + Clone,
{
    fn drop(&mut self) {
        // Release the mutex (and its Arc) before checking whether the entry
        // can go.
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}
