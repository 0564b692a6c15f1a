//! Local authoritative snapshot of one entity collection.
//!
//! The store keeps entities in an ordered key → entity mapping together with
//! the collection-level status. Reads never wait on remote work; writes are
//! crate-private and only issued by the mutator. After every write the store
//! builds one immutable [`CollectionSnapshot`] and hands it to the subscriber
//! registry, outside of the state lock.
//!
//! Snapshots are queued while the state lock is still held and delivered by
//! one caller at a time, so listeners see versions in increasing order even
//! when writes race on a multi-thread runtime.

use crate::entity::Resource;
use crate::error::{Error, Result};
use crate::key::KeyLabel;
use crate::subscriber::SubscriberRegistry;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Collection-level fetch status.
///
/// ```text
/// Idle -> Loading -> Loaded
///         Loading -> Error
/// Loaded -> Loading   (refresh)
/// Error  -> Loading   (retry)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CollectionStatus {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

impl CollectionStatus {
    /// Whether `self -> next` is an edge of the status state machine.
    ///
    /// `Loading -> Loading` is allowed: overlapping fetches share the state.
    pub fn can_transition_to(self, next: CollectionStatus) -> bool {
        use CollectionStatus::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Loading)
                | (Loading, Loaded)
                | (Loading, Error)
                | (Loaded, Loading)
                | (Error, Loading)
        )
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionStatus::Idle => write!(f, "Idle"),
            CollectionStatus::Loading => write!(f, "Loading"),
            CollectionStatus::Loaded => write!(f, "Loaded"),
            CollectionStatus::Error => write!(f, "Error"),
        }
    }
}

/// Immutable view of a collection, shared with readers and listeners.
#[derive(Clone, Debug)]
pub struct CollectionSnapshot<T: Resource> {
    /// Entities in collection order.
    pub entities: Vec<T>,
    pub status: CollectionStatus,
    /// Fetch error. Set iff `status == Error`.
    pub error: Option<Error>,
    /// Error of the most recent failed mutation, until cleared.
    pub mutation_error: Option<Error>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Bumped on every store write.
    pub version: u64,
}

impl<T: Resource> CollectionSnapshot<T> {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some() || self.mutation_error.is_some()
    }

    /// The error a caller should display: the last mutation failure, else the
    /// fetch failure.
    pub fn latest_error(&self) -> Option<&Error> {
        self.mutation_error.as_ref().or(self.error.as_ref())
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.entities.iter().find(|e| e.resource_key() == *key)
    }

    pub fn keys(&self) -> Vec<T::Key> {
        self.entities.iter().map(Resource::resource_key).collect()
    }
}

/// Insertion-ordered key → entity mapping.
struct OrderedEntries<T: Resource> {
    items: Vec<T>,
    index: HashMap<T::Key, usize>,
}

impl<T: Resource> OrderedEntries<T> {
    fn new() -> Self {
        OrderedEntries {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn get(&self, key: &T::Key) -> Option<&T> {
        self.index.get(key).map(|&i| &self.items[i])
    }

    /// Replace in place, or append. Returns the replaced entity and its position.
    fn upsert(&mut self, entity: T) -> Option<(usize, T)> {
        let key = entity.resource_key();
        match self.index.get(&key) {
            Some(&i) => Some((i, std::mem::replace(&mut self.items[i], entity))),
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(entity);
                None
            }
        }
    }

    fn remove(&mut self, key: &T::Key) -> Option<(usize, T)> {
        let i = self.index.remove(key)?;
        let removed = self.items.remove(i);
        self.reindex_from(i);
        Some((i, removed))
    }

    /// Put `entity` back at `position` (clamped). An entity with the same key
    /// that reappeared meanwhile is replaced in place instead.
    fn insert_at(&mut self, position: usize, entity: T) {
        let key = entity.resource_key();
        if let Some(&i) = self.index.get(&key) {
            self.items[i] = entity;
            return;
        }
        let position = position.min(self.items.len());
        self.items.insert(position, entity);
        self.reindex_from(position);
    }

    fn replace_all(&mut self, entities: Vec<T>) {
        self.items.clear();
        self.index.clear();
        for entity in entities {
            self.upsert(entity);
        }
    }

    fn reindex_from(&mut self, start: usize) {
        for (i, entity) in self.items.iter().enumerate().skip(start) {
            self.index.insert(entity.resource_key(), i);
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

struct CollectionState<T: Resource> {
    entries: OrderedEntries<T>,
    status: CollectionStatus,
    error: Option<Error>,
    mutation_error: Option<Error>,
    last_fetched_at: Option<DateTime<Utc>>,
    version: u64,
}

impl<T: Resource> CollectionState<T> {
    fn snapshot(&self) -> CollectionSnapshot<T> {
        CollectionSnapshot {
            entities: self.entries.items.clone(),
            status: self.status,
            error: self.error.clone(),
            mutation_error: self.mutation_error.clone(),
            last_fetched_at: self.last_fetched_at,
            version: self.version,
        }
    }

    /// Apply a status change while keeping the status/error invariants:
    /// `Loaded` has no error, `Error` always has one, `Loading` keeps the
    /// previous error until the fetch resolves.
    fn transition(&mut self, status: CollectionStatus, error: Option<Error>) {
        if self.status != status && !self.status.can_transition_to(status) {
            debug!(
                "{} status {} -> {} is outside the state machine",
                T::resource_kind(),
                self.status,
                status
            );
        }

        match status {
            CollectionStatus::Idle | CollectionStatus::Loaded => {
                self.error = None;
            }
            CollectionStatus::Loading => {
                if error.is_some() {
                    self.error = error;
                }
            }
            CollectionStatus::Error => {
                self.error = Some(
                    error.unwrap_or_else(|| Error::Other("unknown fetch failure".to_string())),
                );
            }
        }
        self.status = status;
    }
}

/// Snapshots waiting for delivery, in version order.
struct Outbox<T: Resource> {
    queue: VecDeque<Arc<CollectionSnapshot<T>>>,
    /// Some caller is draining the queue.
    delivering: bool,
}

/// Thread-safe store for one entity collection.
pub struct Store<T: Resource> {
    state: RwLock<CollectionState<T>>,
    outbox: Mutex<Outbox<T>>,
    registry: SubscriberRegistry<T>,
}

impl<T: Resource> Store<T> {
    /// Create an empty store in `Idle` status.
    pub fn new() -> Self {
        Store {
            state: RwLock::new(CollectionState {
                entries: OrderedEntries::new(),
                status: CollectionStatus::Idle,
                error: None,
                mutation_error: None,
                last_fetched_at: None,
                version: 0,
            }),
            outbox: Mutex::new(Outbox {
                queue: VecDeque::new(),
                delivering: false,
            }),
            registry: SubscriberRegistry::new(),
        }
    }

    /// All entities in collection order.
    pub fn get_all(&self) -> Vec<T> {
        self.read().entries.items.clone()
    }

    /// One entity by key.
    ///
    /// # Errors
    /// Returns `Error::NotFound` when the key is not in the store.
    pub fn get_one(&self, key: &T::Key) -> Result<T> {
        self.read()
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(KeyLabel::build::<T>(key)))
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.read().entries.get(key).is_some()
    }

    pub fn snapshot(&self) -> Arc<CollectionSnapshot<T>> {
        Arc::new(self.read().snapshot())
    }

    pub fn status(&self) -> CollectionStatus {
        self.read().status
    }

    /// Status together with the fetch error it carries.
    pub(crate) fn status_and_error(&self) -> (CollectionStatus, Option<Error>) {
        let state = self.read();
        (state.status, state.error.clone())
    }

    pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.read().last_fetched_at
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscriber registry notified after each write.
    pub fn registry(&self) -> &SubscriberRegistry<T> {
        &self.registry
    }

    // ------------------------------------------------------------------------
    // Writes (mutator only)
    // ------------------------------------------------------------------------

    /// Replace the entire mapping, keeping the order of `entities`.
    pub(crate) fn replace_all(&self, entities: Vec<T>) {
        self.write(|state| {
            state.entries.replace_all(entities);
            ((), true)
        });
    }

    /// Insert or overwrite by key. Returns the previous value and position.
    pub(crate) fn upsert(&self, entity: T) -> Option<(usize, T)> {
        self.write(|state| (state.entries.upsert(entity), true))
    }

    /// Delete by key; no-op (and no notification) if absent.
    pub(crate) fn remove(&self, key: &T::Key) -> Option<(usize, T)> {
        self.write(|state| {
            let removed = state.entries.remove(key);
            let changed = removed.is_some();
            (removed, changed)
        })
    }

    /// Rollback primitive: restore a removed entity at its former position.
    pub(crate) fn insert_at(&self, position: usize, entity: T) {
        self.write(|state| {
            state.entries.insert_at(position, entity);
            ((), true)
        });
    }

    /// Transition the collection status.
    pub(crate) fn set_status(&self, status: CollectionStatus, error: Option<Error>) {
        self.write(|state| {
            state.transition(status, error);
            ((), true)
        });
    }

    /// Apply a successful fetch in one write: content, fetch time and status.
    ///
    /// `settled` is false when a newer fetch is still outstanding; the status
    /// then stays `Loading`.
    pub(crate) fn apply_fetch(&self, entities: Vec<T>, fetched_at: DateTime<Utc>, settled: bool) {
        self.write(|state| {
            state.entries.replace_all(entities);
            state.last_fetched_at = Some(fetched_at);
            if settled {
                state.transition(CollectionStatus::Loaded, None);
            }
            ((), true)
        });
    }

    pub(crate) fn set_mutation_error(&self, error: Option<Error>) {
        self.write(|state| {
            let changed = state.mutation_error != error;
            state.mutation_error = error;
            ((), changed)
        });
    }

    /// Clear the last mutation error. A fetch error stays until the next
    /// successful fetch, since it describes the `Error` status.
    pub(crate) fn clear_mutation_error(&self) {
        self.set_mutation_error(None);
    }

    /// Run `f` under the write lock, bump the version when it reports a
    /// change, and notify listeners once the lock is released.
    fn write<R>(&self, f: impl FnOnce(&mut CollectionState<T>) -> (R, bool)) -> R {
        let result = {
            let mut state = self.state_mut();
            let (result, changed) = f(&mut state);
            if changed {
                state.version += 1;
                // Queued under the state lock: queue order is version order.
                self.outbox().queue.push_back(Arc::new(state.snapshot()));
            }
            result
        };

        self.deliver();
        result
    }

    /// Drain the outbox. If another caller is already delivering (another
    /// thread, or a listener writing from inside a notification), it also
    /// delivers the snapshots queued here.
    fn deliver(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.delivering || outbox.queue.is_empty() {
                return;
            }
            outbox.delivering = true;
        }

        loop {
            let snapshot = {
                let mut outbox = self.outbox();
                match outbox.queue.pop_front() {
                    Some(snapshot) => snapshot,
                    None => {
                        outbox.delivering = false;
                        return;
                    }
                }
            };

            trace!(
                "{} v{}: {} entities, {}",
                T::resource_kind(),
                snapshot.version,
                snapshot.len(),
                snapshot.status
            );
            self.registry.notify(&snapshot);
        }
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox<T>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, CollectionState<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, CollectionState<T>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Resource> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}
