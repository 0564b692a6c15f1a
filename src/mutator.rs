//! Mutator - applies fetches and mutations to the store.
//!
//! Every remote call of a cache goes through the [`Mutator`]. It owns the
//! fetch sequencing, the per-key mutation locks and the pending set, and is
//! the only writer of its [`Store`].

use crate::config::CacheConfig;
use crate::entity::{find_conflict, Resource, ResourceDraft};
use crate::error::{Error, Result};
use crate::key::{KeyLabel, KeyLocks};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::pending::{MutationKind, PendingMutation, PendingSet};
use crate::remote::RemoteCollection;
use crate::store::{CollectionStatus, Store};
use crate::strategy::FetchStrategy;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Sequence numbers of `fetch_all` calls.
#[derive(Debug, Default)]
struct FetchSequence {
    /// Last sequence number handed out.
    issued: u64,
    /// Sequence number of the latest fetch whose outcome is in the store.
    applied: u64,
    /// Fetches issued and neither answered nor abandoned.
    live: BTreeSet<u64>,
    /// First sequence number of the current `Loading` period.
    round_start: u64,
    /// Status and error in place before the current `Loading` period.
    resume: Option<(CollectionStatus, Option<Error>)>,
}

impl FetchSequence {
    fn newer_live(&self, seq: u64) -> bool {
        self.live.range(seq + 1..).next().is_some()
    }
}

/// Marks a fetch as abandoned if its future is dropped before the remote
/// answers.
struct FetchTicket<'a, T: Resource, R: RemoteCollection<T>> {
    mutator: &'a Mutator<T, R>,
    seq: u64,
    answered: bool,
}

impl<T: Resource, R: RemoteCollection<T>> Drop for FetchTicket<'_, T, R> {
    fn drop(&mut self) {
        if !self.answered {
            self.mutator.abandon_fetch(self.seq);
        }
    }
}

/// How to undo an optimistic change.
enum Undo<T: Resource> {
    /// Put the previous value back at its position.
    Reinsert(usize, T),
    /// The key was not cached before; drop it again.
    Remove(T::Key),
}

/// An optimistic change not yet confirmed by the remote.
///
/// Unless committed, it is undone: explicitly on a remote failure, or on
/// drop when the mutation future is abandoned mid-flight. Declared after the
/// key guard so the undo runs while the key is still locked.
struct OptimisticWrite<'a, T: Resource, R: RemoteCollection<T>> {
    mutator: &'a Mutator<T, R>,
    label: &'a str,
    kind: MutationKind,
    undo: Option<Undo<T>>,
}

impl<'a, T: Resource, R: RemoteCollection<T>> OptimisticWrite<'a, T, R> {
    fn new(
        mutator: &'a Mutator<T, R>,
        label: &'a str,
        kind: MutationKind,
        undo: Option<Undo<T>>,
    ) -> Self {
        OptimisticWrite {
            mutator,
            label,
            kind,
            undo,
        }
    }

    fn commit(mut self) {
        self.undo = None;
    }

    fn roll_back(mut self, err: &Error) {
        if self.undo.is_some() {
            warn!("⚠ {} {} rolled back: {}", self.kind, self.label, err);
        }
        self.revert();
    }

    fn revert(&mut self) {
        let store = &self.mutator.store;
        match self.undo.take() {
            Some(Undo::Reinsert(position, value)) => store.insert_at(position, value),
            Some(Undo::Remove(key)) => {
                store.remove(&key);
            }
            None => return,
        }
        self.mutator.metrics.record_rollback(self.label, self.kind);
    }
}

impl<T: Resource, R: RemoteCollection<T>> Drop for OptimisticWrite<'_, T, R> {
    fn drop(&mut self) {
        if self.undo.is_none() {
            return;
        }
        let err = Error::Other(format!(
            "{} {} abandoned before the remote answered",
            self.kind, self.label
        ));
        warn!("⚠ {}; local change rolled back", err);
        self.revert();
        self.mutator.store.set_mutation_error(Some(err.clone()));
        self.mutator.metrics.record_error(self.label, &err);
    }
}

/// Fetch and mutation engine for one collection.
///
/// # Example
///
/// ```ignore
/// let mutator = Mutator::new(Arc::new(Store::new()), remote)
///     .with_config(CacheConfig::default().with_preflight_conflicts(false));
///
/// mutator.fetch_all().await?;
/// let saved = mutator.update(medication).await?;
/// ```
pub struct Mutator<T: Resource, R: RemoteCollection<T>> {
    store: Arc<Store<T>>,
    remote: R,
    metrics: Box<dyn CacheMetrics>,
    config: CacheConfig,
    locks: KeyLocks<T::Key>,
    pending: PendingSet<T>,
    sequence: Mutex<FetchSequence>,
}

impl<T: Resource, R: RemoteCollection<T>> Mutator<T, R> {
    pub fn new(store: Arc<Store<T>>, remote: R) -> Self {
        Mutator {
            store,
            remote,
            metrics: Box::new(NoOpMetrics),
            config: CacheConfig::default(),
            locks: KeyLocks::new(),
            pending: PendingSet::new(),
            sequence: Mutex::new(FetchSequence::default()),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<Store<T>> {
        &self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Mutations issued and not yet resolved, in submission order.
    pub fn pending(&self) -> Vec<PendingMutation<T>> {
        self.pending.snapshot()
    }

    /// Whether a mutation currently holds or waits on `key`.
    pub fn is_busy(&self, key: &T::Key) -> bool {
        self.locks.is_busy(key)
    }

    // ------------------------------------------------------------------------
    // Fetch
    // ------------------------------------------------------------------------

    /// Fetch the whole collection and replace the store content.
    ///
    /// Results are applied in issue order: a result older than the one
    /// already applied is discarded, and the status only settles to `Loaded`
    /// once no newer fetch is outstanding. Dropping the returned future
    /// abandons the fetch; the status still leaves `Loading` once nothing
    /// newer is outstanding.
    ///
    /// # Errors
    /// Returns the remote error. The store keeps its last good content; the
    /// status moves to `Error` unless a newer fetch is still outstanding.
    pub async fn fetch_all(&self) -> Result<()> {
        let timer = Instant::now();
        let label = KeyLabel::collection::<T>();

        let seq = {
            let mut sequence = self.lock_sequence();
            sequence.issued += 1;
            let seq = sequence.issued;
            sequence.live.insert(seq);

            let (status, error) = self.store.status_and_error();
            if status != CollectionStatus::Loading {
                sequence.round_start = seq;
                sequence.resume = Some((status, error));
            }
            self.store.set_status(CollectionStatus::Loading, None);
            seq
        };
        debug!("» fetch {} #{}", label, seq);

        let mut ticket = FetchTicket {
            mutator: self,
            seq,
            answered: false,
        };
        let result = self.remote.fetch_all().await;
        ticket.answered = true;

        let mut sequence = self.lock_sequence();
        sequence.live.remove(&seq);
        match result {
            Ok(entities) => {
                if seq < sequence.applied {
                    warn!("⚠ fetch {} #{} superseded by #{}", label, seq, sequence.applied);
                    self.metrics.record_stale_fetch(&label, seq);
                    return Ok(());
                }

                let count = entities.len();
                let settled = !sequence.newer_live(seq);
                sequence.applied = seq;
                self.store.apply_fetch(entities, Utc::now(), settled);
                drop(sequence);

                self.metrics.record_fetch(&label, count, timer.elapsed());
                info!(
                    "✓ fetch {} #{}: {} entities in {:?}",
                    label,
                    seq,
                    count,
                    timer.elapsed()
                );
                Ok(())
            }
            Err(err) => {
                if seq < sequence.applied || sequence.newer_live(seq) {
                    warn!("⚠ fetch {} #{} failed after a newer fetch was issued", label, seq);
                    self.metrics.record_stale_fetch(&label, seq);
                    return Err(err);
                }

                sequence.applied = seq;
                self.store
                    .set_status(CollectionStatus::Error, Some(err.clone()));
                drop(sequence);

                self.metrics.record_error(&label, &err);
                Err(err)
            }
        }
    }

    /// Forget a fetch whose future was dropped.
    ///
    /// When nothing newer than the applied result is still outstanding, the
    /// `Loading` status is settled: `Loaded` if a result of this period was
    /// applied or the collection was loaded before, else `Error`.
    fn abandon_fetch(&self, seq: u64) {
        let label = KeyLabel::collection::<T>();
        warn!("⚠ fetch {} #{} abandoned before the remote answered", label, seq);
        self.metrics.record_stale_fetch(&label, seq);

        let mut sequence = self.lock_sequence();
        sequence.live.remove(&seq);
        if sequence.newer_live(sequence.applied)
            || self.store.status() != CollectionStatus::Loading
        {
            return;
        }

        if sequence.applied >= sequence.round_start {
            self.store.set_status(CollectionStatus::Loaded, None);
            return;
        }
        match sequence.resume.take() {
            Some((CollectionStatus::Loaded, _)) => {
                self.store.set_status(CollectionStatus::Loaded, None);
            }
            Some((_, Some(err))) => {
                self.store.set_status(CollectionStatus::Error, Some(err));
            }
            _ => {
                let err = Error::Other(format!("fetch {} abandoned before the remote answered", label));
                self.metrics.record_error(&label, &err);
                self.store.set_status(CollectionStatus::Error, Some(err));
            }
        }
    }

    /// Load the collection according to `strategy`.
    ///
    /// Returns whether the remote was contacted.
    ///
    /// # Errors
    /// Returns the fetch error when a fetch was needed and failed.
    pub async fn load(&self, strategy: FetchStrategy) -> Result<bool> {
        let snapshot = self.store.snapshot();
        let fetch = strategy.should_fetch(
            snapshot.status,
            snapshot.last_fetched_at,
            self.config.stale_after,
            Utc::now(),
        );

        if !fetch {
            debug!(
                "✓ load {} ({}): serving {} cached entities",
                KeyLabel::collection::<T>(),
                strategy,
                snapshot.len()
            );
            return Ok(false);
        }

        self.fetch_all().await.map(|_| true)
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Create an entity. Nothing is inserted until the remote confirms and
    /// assigns a key.
    ///
    /// # Errors
    /// `Error::Validation` from client checks or the remote, or the remote's
    /// transport error.
    pub async fn create(&self, draft: &T::Draft) -> Result<T> {
        let timer = Instant::now();
        let label = KeyLabel::collection::<T>();
        debug!("» create {}", label);

        let result = self.try_create(draft).await;
        let label = match &result {
            Ok(entity) => KeyLabel::build::<T>(&entity.resource_key()),
            Err(_) => label,
        };
        self.settle(&label, MutationKind::Create, timer, result)
    }

    async fn try_create(&self, draft: &T::Draft) -> Result<T> {
        if self.config.validate_before_send {
            draft.validate()?;
        }
        if self.config.preflight_conflicts {
            find_conflict::<T>(&draft.unique_fields(), &self.store.get_all(), None)?;
        }

        let _ticket = self.pending.track(MutationKind::Create, None);
        let entity = self.remote.create(draft).await?;
        self.store.upsert(entity.clone());
        Ok(entity)
    }

    /// Update an entity optimistically.
    ///
    /// Waits for earlier mutations on the same key, shows `entity` right away
    /// and restores the previous value if the remote rejects the change.
    ///
    /// Returns the stored value: the server's version when it sent one back,
    /// `entity` otherwise.
    ///
    /// # Errors
    /// `Error::Validation` | `Error::NotFound` | `Error::Network`
    pub async fn update(&self, entity: T) -> Result<T> {
        let timer = Instant::now();
        let key = entity.resource_key();
        let label = KeyLabel::build::<T>(&key);
        debug!("» update {}", label);

        let result = self.try_update(&label, entity).await;
        self.settle(&label, MutationKind::Update, timer, result)
    }

    async fn try_update(&self, label: &str, entity: T) -> Result<T> {
        let key = entity.resource_key();
        if self.config.validate_before_send {
            entity.validate()?;
        }

        let ticket = self.pending.track(MutationKind::Update, Some(key.clone()));
        let _guard = self.locks.acquire(&key).await;

        if self.config.preflight_conflicts {
            find_conflict::<T>(&entity.unique_fields(), &self.store.get_all(), Some(&key))?;
        }

        let previous = self.store.upsert(entity.clone());
        ticket.record_previous(previous.clone());
        let undo = match previous {
            Some((position, value)) => Undo::Reinsert(position, value),
            None => Undo::Remove(key),
        };
        let write = OptimisticWrite::new(self, label, MutationKind::Update, Some(undo));

        match self.remote.update(&entity).await {
            Ok(Some(saved)) => {
                write.commit();
                self.store.upsert(saved.clone());
                Ok(saved)
            }
            Ok(None) => {
                write.commit();
                Ok(entity)
            }
            Err(err) => {
                write.roll_back(&err);
                Err(err)
            }
        }
    }

    /// Delete an entity optimistically, putting it back at its former
    /// position if the remote rejects the delete.
    ///
    /// # Errors
    /// `Error::NotFound` | `Error::Network`
    pub async fn delete(&self, key: &T::Key) -> Result<()> {
        let timer = Instant::now();
        let label = KeyLabel::build::<T>(key);
        debug!("» delete {}", label);

        let result = self.try_delete(&label, key).await;
        self.settle(&label, MutationKind::Delete, timer, result)
    }

    async fn try_delete(&self, label: &str, key: &T::Key) -> Result<()> {
        let ticket = self.pending.track(MutationKind::Delete, Some(key.clone()));
        let _guard = self.locks.acquire(key).await;

        let removed = self.store.remove(key);
        ticket.record_previous(removed.clone());
        let undo = removed.map(|(position, value)| Undo::Reinsert(position, value));
        let write = OptimisticWrite::new(self, label, MutationKind::Delete, undo);

        match self.remote.delete(key).await {
            Ok(()) => {
                write.commit();
                Ok(())
            }
            Err(err) => {
                write.roll_back(&err);
                Err(err)
            }
        }
    }

    /// Restore a soft-deleted entity, then fetch the collection once.
    ///
    /// Restoring an entity that is already active succeeds. A failure of the
    /// follow-up fetch is reported through the collection status, not here.
    ///
    /// # Errors
    /// `Error::NotFound` | `Error::Network` | `Error::NotImplemented`
    pub async fn restore(&self, key: &T::Key) -> Result<()> {
        let timer = Instant::now();
        let label = KeyLabel::build::<T>(key);
        debug!("» restore {}", label);

        let result = {
            let _ticket = self.pending.track(MutationKind::Restore, Some(key.clone()));
            let _guard = self.locks.acquire(key).await;
            self.remote.restore(key).await
        };
        let result = self.settle(&label, MutationKind::Restore, timer, result);

        if result.is_ok() {
            // Server-side derived fields may have changed; take its view.
            let _ = self.fetch_all().await;
        }
        result
    }

    /// Re-read one entity from the remote.
    ///
    /// Runs under the key lock like a mutation and is listed as pending
    /// while in flight. Returns `None` (and drops the local copy) when the
    /// remote no longer has it.
    ///
    /// # Errors
    /// `Error::Network` and other remote errors except `NotFound`.
    pub async fn refresh_one(&self, key: &T::Key) -> Result<Option<T>> {
        let timer = Instant::now();
        let label = KeyLabel::build::<T>(key);
        debug!("» refresh {}", label);

        let result = self.try_refresh(key).await;
        self.settle(&label, MutationKind::Refresh, timer, result)
    }

    async fn try_refresh(&self, key: &T::Key) -> Result<Option<T>> {
        let _ticket = self.pending.track(MutationKind::Refresh, Some(key.clone()));
        let _guard = self.locks.acquire(key).await;

        match self.remote.fetch_one(key).await {
            Ok(entity) => {
                self.store.upsert(entity.clone());
                Ok(Some(entity))
            }
            Err(Error::NotFound(_)) => {
                self.store.remove(key);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Clear the last mutation error.
    pub fn clear_error(&self) {
        self.store.clear_mutation_error();
    }

    /// Record the outcome of a mutation in the store and the metrics.
    fn settle<V>(
        &self,
        label: &str,
        kind: MutationKind,
        timer: Instant,
        result: Result<V>,
    ) -> Result<V> {
        match &result {
            Ok(_) => {
                self.store.clear_mutation_error();
                self.metrics.record_mutation(label, kind, timer.elapsed());
                debug!("✓ {} {} in {:?}", kind, label, timer.elapsed());
            }
            Err(err) => {
                self.store.set_mutation_error(Some(err.clone()));
                self.metrics.record_error(label, err);
            }
        }
        result
    }

    fn lock_sequence(&self) -> MutexGuard<'_, FetchSequence> {
        self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
