//! Subscriber registry: change notifications without polling.
//!
//! Listeners are plain callbacks invoked synchronously after every store
//! change (`replace_all`, `upsert`, `remove`, status changes). All listeners of
//! one notification receive the same `Arc<CollectionSnapshot<T>>`.
//!
//! A listener that panics is isolated: the panic is caught and logged, the
//! remaining listeners are still notified, and the store is unaffected.

use crate::entity::Resource;
use crate::store::CollectionSnapshot;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Callback registered with [`SubscriberRegistry::subscribe`].
pub type Listener<T> = Arc<dyn Fn(&Arc<CollectionSnapshot<T>>) + Send + Sync>;

struct RegistryInner<T: Resource> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
}

impl<T: Resource> RegistryInner<T> {
    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener<T>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

/// Registry of change listeners for one collection.
pub struct SubscriberRegistry<T: Resource> {
    inner: Arc<RegistryInner<T>>,
}

impl<T: Resource> SubscriberRegistry<T> {
    pub fn new() -> Self {
        SubscriberRegistry {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a listener. Keep the returned handle to unsubscribe later.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<CollectionSnapshot<T>>) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().push((id, Arc::new(listener)));
        debug!("✓ Subscribed listener #{} to {}", id, T::resource_kind());

        let weak: Weak<RegistryInner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            unsubscribe: Some(Box::new(move || {
                weak.upgrade().is_some_and(|inner| inner.remove(id))
            })),
        }
    }

    /// Deliver `snapshot` to every registered listener.
    ///
    /// Listeners run outside the registry lock, so they may subscribe,
    /// unsubscribe or read the cache from within the callback.
    pub(crate) fn notify(&self, snapshot: &Arc<CollectionSnapshot<T>>) {
        let listeners: Vec<(u64, Listener<T>)> = self.inner.listeners().clone();

        for (id, listener) in listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener(snapshot)));
            if delivered.is_err() {
                warn!(
                    "⚠ Listener #{} of {} panicked on version {}; continuing",
                    id,
                    T::resource_kind(),
                    snapshot.version
                );
            }
        }
    }

    /// Drop all listeners.
    pub(crate) fn clear(&self) {
        let removed = {
            let mut listeners = self.inner.listeners();
            let n = listeners.len();
            listeners.clear();
            n
        };
        debug!("✓ Cleared {} listener(s) of {}", removed, T::resource_kind());
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner.listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Resource> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
/// Unsubscribing never interrupts in-flight mutations.
pub struct Subscription {
    id: u64,
    unsubscribe: Option<Box<dyn FnOnce() -> bool + Send + Sync>>,
}

impl Subscription {
    /// A handle bound to no listener (id 0).
    pub(crate) fn detached() -> Self {
        Subscription {
            id: 0,
            unsubscribe: None,
        }
    }

    /// Id of the listener within its registry.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. Returns false if it was already gone (e.g. the
    /// cache was disposed).
    pub fn unsubscribe(mut self) -> bool {
        match self.unsubscribe.take() {
            Some(unsubscribe) => unsubscribe(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
