//! In-flight optimistic mutations.

use crate::entity::Resource;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Kind of a mutation issued against the remote collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Restore,
    /// Key-locked re-read of one entity.
    Refresh,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "Create"),
            MutationKind::Update => write!(f, "Update"),
            MutationKind::Delete => write!(f, "Delete"),
            MutationKind::Restore => write!(f, "Restore"),
            MutationKind::Refresh => write!(f, "Refresh"),
        }
    }
}

/// A mutation that has been issued and not yet resolved.
///
/// Lives from the moment the mutation starts until it commits or rolls back.
#[derive(Clone, Debug)]
pub struct PendingMutation<T: Resource> {
    /// Unique id of this mutation within its cache.
    pub id: u64,
    pub kind: MutationKind,
    /// Target key; `None` for a create until the server assigns one.
    pub key: Option<T::Key>,
    /// Value the store held before the optimistic change.
    pub previous_snapshot: Option<T>,
    /// Position of `previous_snapshot` in the collection order.
    pub previous_position: Option<usize>,
    pub submitted_at: DateTime<Utc>,
}

/// The set of pending mutations owned by one cache.
pub(crate) struct PendingSet<T: Resource> {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, PendingMutation<T>>>,
}

impl<T: Resource> PendingSet<T> {
    pub(crate) fn new() -> Self {
        PendingSet {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a mutation and return its id.
    pub(crate) fn begin(&self, kind: MutationKind, key: Option<T::Key>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = PendingMutation {
            id,
            kind,
            key,
            previous_snapshot: None,
            previous_position: None,
            submitted_at: Utc::now(),
        };
        self.lock().insert(id, pending);
        id
    }

    /// Record what the optimistic change replaced.
    pub(crate) fn record_previous(&self, id: u64, previous: Option<(usize, T)>) {
        if let Some(pending) = self.lock().get_mut(&id) {
            match previous {
                Some((position, entity)) => {
                    pending.previous_position = Some(position);
                    pending.previous_snapshot = Some(entity);
                }
                None => {
                    pending.previous_position = None;
                    pending.previous_snapshot = None;
                }
            }
        }
    }

    /// Resolve (commit or roll back) a mutation, returning its record.
    pub(crate) fn finish(&self, id: u64) -> Option<PendingMutation<T>> {
        self.lock().remove(&id)
    }

    /// Pending mutations in submission order.
    pub(crate) fn snapshot(&self) -> Vec<PendingMutation<T>> {
        self.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Register a mutation that resolves when the returned ticket drops.
    pub(crate) fn track(&self, kind: MutationKind, key: Option<T::Key>) -> PendingTicket<'_, T> {
        PendingTicket {
            id: self.begin(kind, key),
            set: self,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, PendingMutation<T>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Keeps one mutation in the pending set for as long as it lives.
pub(crate) struct PendingTicket<'a, T: Resource> {
    id: u64,
    set: &'a PendingSet<T>,
}

impl<T: Resource> PendingTicket<'_, T> {
    pub(crate) fn record_previous(&self, previous: Option<(usize, T)>) {
        self.set.record_previous(self.id, previous);
    }
}

impl<T: Resource> Drop for PendingTicket<'_, T> {
    fn drop(&mut self) {
        self.set.finish(self.id);
    }
}
