//! High-level resource cache for application code.
//!
//! Provides a convenient wrapper around [`Mutator`] and [`Store`] with `Arc`
//! for easy sharing.

use crate::config::CacheConfig;
use crate::entity::Resource;
use crate::error::{Error, Result};
use crate::mutator::Mutator;
use crate::observability::CacheMetrics;
use crate::pending::PendingMutation;
use crate::remote::RemoteCollection;
use crate::store::{CollectionSnapshot, CollectionStatus, Store};
use crate::strategy::FetchStrategy;
use crate::subscriber::Subscription;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cache of one server-backed entity collection.
///
/// Cloning is cheap and every clone shares the same state, so one instance can
/// be handed to all consumers of a collection.
///
/// Mutating methods never return errors: failures are recorded as the
/// collection's error (see [`ResourceCache::error`]) and reported as `false`
/// or `None`.
///
/// # Lifecycle
///
/// Construct one cache per collection and call [`ResourceCache::dispose`]
/// when the owner goes away. Disposing drops the listeners; mutations already
/// issued still run to completion.
///
/// # Example
///
/// ```ignore
/// use resource_cache::{ResourceCache, InMemoryRemote};
/// use resource_cache::domain::medication::{Medication, MedicationDraft};
///
/// let medications = ResourceCache::new(remote);
///
/// let sub = medications.subscribe(|snapshot| {
///     println!("{} medications ({})", snapshot.len(), snapshot.status);
/// });
///
/// medications.fetch_all().await;
/// if medications.create(&draft).await.is_none() {
///     eprintln!("{}", medications.error().map(|e| e.message()).unwrap_or_default());
/// }
/// sub.unsubscribe();
/// ```
pub struct ResourceCache<T: Resource, R: RemoteCollection<T>> {
    mutator: Arc<Mutator<T, R>>,
    disposed: Arc<AtomicBool>,
}

impl<T: Resource, R: RemoteCollection<T>> Clone for ResourceCache<T, R> {
    fn clone(&self) -> Self {
        ResourceCache {
            mutator: Arc::clone(&self.mutator),
            disposed: Arc::clone(&self.disposed),
        }
    }
}

impl<T: Resource, R: RemoteCollection<T>> ResourceCache<T, R> {
    /// Create a new cache over the given remote collection.
    pub fn new(remote: R) -> Self {
        Self::from_mutator(Mutator::new(Arc::new(Store::new()), remote))
    }

    /// Create a new cache with custom configuration.
    pub fn with_config(remote: R, config: CacheConfig) -> Self {
        Self::from_mutator(Mutator::new(Arc::new(Store::new()), remote).with_config(config))
    }

    /// Create a new cache with custom metrics.
    pub fn with_metrics(remote: R, metrics: Box<dyn CacheMetrics>) -> Self {
        Self::from_mutator(Mutator::new(Arc::new(Store::new()), remote).with_metrics(metrics))
    }

    /// Create a cache around a fully configured mutator.
    pub fn from_mutator(mutator: Mutator<T, R>) -> Self {
        ResourceCache {
            mutator: Arc::new(mutator),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    // ------------------------------------------------------------------------
    // Reads (never touch the remote)
    // ------------------------------------------------------------------------

    /// Current state as one immutable snapshot.
    pub fn snapshot(&self) -> Arc<CollectionSnapshot<T>> {
        self.store().snapshot()
    }

    /// All entities in collection order.
    pub fn entities(&self) -> Vec<T> {
        self.store().get_all()
    }

    pub fn get(&self, key: &T::Key) -> Option<T> {
        self.store().get_one(key).ok()
    }

    /// # Errors
    /// Returns `Error::NotFound` when the key is not cached.
    pub fn get_one(&self, key: &T::Key) -> Result<T> {
        self.store().get_one(key)
    }

    pub fn status(&self) -> CollectionStatus {
        self.store().status()
    }

    /// Collection-level error: the last failed mutation, else the last
    /// failed fetch.
    pub fn error(&self) -> Option<Error> {
        self.snapshot().latest_error().cloned()
    }

    pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.store().last_fetched_at()
    }

    /// Mutations issued and not yet resolved.
    pub fn pending(&self) -> Vec<PendingMutation<T>> {
        self.mutator.pending()
    }

    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    /// Entities matching `predicate`, in collection order.
    pub fn filter<P>(&self, predicate: P) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        self.snapshot()
            .entities
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Remote operations
    // ------------------------------------------------------------------------

    /// Fetch the whole collection. Returns false if the fetch failed.
    pub async fn fetch_all(&self) -> bool {
        self.mutator.fetch_all().await.is_ok()
    }

    /// Load according to `strategy`. Returns false only when a needed fetch
    /// failed.
    pub async fn load(&self, strategy: FetchStrategy) -> bool {
        self.mutator.load(strategy).await.is_ok()
    }

    /// Create an entity; returns the server's version of it.
    pub async fn create(&self, draft: &T::Draft) -> Option<T> {
        self.mutator.create(draft).await.ok()
    }

    /// Update an entity optimistically; returns the stored value.
    pub async fn update(&self, entity: T) -> Option<T> {
        self.mutator.update(entity).await.ok()
    }

    /// Delete an entity optimistically.
    pub async fn delete(&self, key: &T::Key) -> bool {
        self.mutator.delete(key).await.is_ok()
    }

    /// Restore a soft-deleted entity and re-fetch the collection.
    pub async fn restore(&self, key: &T::Key) -> bool {
        self.mutator.restore(key).await.is_ok()
    }

    /// Re-read one entity. `None` if it is gone or the read failed.
    pub async fn refresh_one(&self, key: &T::Key) -> Option<T> {
        self.mutator.refresh_one(key).await.ok().flatten()
    }

    /// Clear the last mutation error.
    pub fn clear_error(&self) {
        self.mutator.clear_error();
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Register a listener called after every change with the new snapshot.
    ///
    /// A disposed cache accepts no listeners; the returned handle is inert.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<CollectionSnapshot<T>>) + Send + Sync + 'static,
    {
        if self.is_disposed() {
            warn!("⚠ subscribe on disposed {} cache ignored", T::resource_kind());
            return Subscription::detached();
        }
        self.store().registry().subscribe(listener)
    }

    /// Drop all listeners. In-flight mutations continue; reads and
    /// mutations keep working, but no one is notified any more.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.store().registry().clear();
            info!("✓ {} cache disposed", T::resource_kind());
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// The remote collaborator.
    pub fn remote(&self) -> &R {
        self.mutator.remote()
    }

    /// Get a reference to the underlying mutator.
    pub fn mutator(&self) -> &Mutator<T, R> {
        &self.mutator
    }

    fn store(&self) -> &Store<T> {
        self.mutator.store()
    }
}
