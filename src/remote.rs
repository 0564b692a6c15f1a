//! Remote collaborator trait for abstracting the server-side collection.
//!
//! The `RemoteCollection` trait decouples the cache from HTTP clients, JSON
//! shapes and endpoints. One instance serves one entity type. The transport
//! layer implements it; the cache only sees typed entities and the error
//! taxonomy of [`crate::error::Error`].
//!
//! # Mocking for Tests
//!
//! [`InMemoryRemote`] is a soft-delete aware, scriptable in-memory
//! implementation: it assigns keys on create like a server would, and can be
//! told to delay or fail the next call of any operation.
//!
//! ```ignore
//! let remote = InMemoryRemote::new(|id, draft: &MedicationDraft| draft.clone().into_medication(id));
//! remote.fail_next(RemoteOp::Update, Error::Network("timeout".into()));
//! remote.delay_next(RemoteOp::FetchAll, Duration::from_millis(200));
//! ```
//!
//! # Error Handling
//!
//! Implementations should report:
//! - `Error::Validation` for rejected payloads (including uniqueness conflicts)
//! - `Error::NotFound` for unknown keys
//! - `Error::Network` for unreachable hosts, timeouts and malformed responses

use crate::entity::Resource;
use crate::error::{Error, Result};
use crate::key::KeyLabel;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Trait for remote collection implementations.
#[allow(async_fn_in_trait)]
pub trait RemoteCollection<T: Resource>: Send + Sync {
    /// Fetch every (active) entity of the collection, in server order.
    ///
    /// # Errors
    /// `Error::Network` if the collection cannot be retrieved.
    async fn fetch_all(&self) -> Result<Vec<T>>;

    /// Fetch one entity by key.
    ///
    /// Default implementation filters `fetch_all()`. Override with a direct
    /// lookup where the server offers one.
    ///
    /// # Errors
    /// `Error::NotFound` | `Error::Network`
    async fn fetch_one(&self, key: &T::Key) -> Result<T> {
        self.fetch_all()
            .await?
            .into_iter()
            .find(|e| e.resource_key() == *key)
            .ok_or_else(|| Error::NotFound(KeyLabel::build::<T>(key)))
    }

    /// Create an entity. The server assigns the key and derived fields.
    ///
    /// # Errors
    /// `Error::Validation` | `Error::Network`
    async fn create(&self, draft: &T::Draft) -> Result<T>;

    /// Update an entity.
    ///
    /// # Returns
    /// - `Ok(Some(entity))` - server returned its stored version
    /// - `Ok(None)` - server acknowledged without a body
    ///
    /// # Errors
    /// `Error::Validation` | `Error::NotFound` | `Error::Network`
    async fn update(&self, entity: &T) -> Result<Option<T>>;

    /// Delete (or soft delete) an entity.
    ///
    /// # Errors
    /// `Error::NotFound` | `Error::Network`
    async fn delete(&self, key: &T::Key) -> Result<()>;

    /// Restore a soft-deleted entity. Restoring an active entity succeeds.
    ///
    /// # Errors
    /// Returns `Err` if not implemented, or `Error::NotFound` | `Error::Network`
    async fn restore(&self, key: &T::Key) -> Result<()> {
        Err(Error::NotImplemented(format!(
            "restore not supported for {}",
            KeyLabel::build::<T>(key)
        )))
    }
}

// ============================================================================
// In-Memory Test Remote
// ============================================================================

/// Operations of the remote collaborator, used to script [`InMemoryRemote`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    FetchAll,
    FetchOne,
    Create,
    Update,
    Delete,
    Restore,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteOp::FetchAll => write!(f, "FetchAll"),
            RemoteOp::FetchOne => write!(f, "FetchOne"),
            RemoteOp::Create => write!(f, "Create"),
            RemoteOp::Update => write!(f, "Update"),
            RemoteOp::Delete => write!(f, "Delete"),
            RemoteOp::Restore => write!(f, "Restore"),
        }
    }
}

#[derive(Default)]
struct Step {
    delay: Option<Duration>,
    failure: Option<Error>,
}

impl Step {
    async fn wait(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Answer with the scripted failure, if any, after the scripted delay.
    async fn rejected(&self) -> Result<()> {
        match &self.failure {
            Some(err) => {
                self.wait().await;
                Err(err.clone())
            }
            None => Ok(()),
        }
    }
}

struct Record<T> {
    entity: T,
    deleted: bool,
}

type Factory<T> = Box<dyn Fn(u64, &<T as Resource>::Draft) -> T + Send + Sync>;

struct RemoteInner<T: Resource> {
    records: Mutex<Vec<Record<T>>>,
    next_id: AtomicU64,
    factory: Factory<T>,
    script: Mutex<HashMap<RemoteOp, VecDeque<Step>>>,
    calls: Mutex<HashMap<RemoteOp, usize>>,
}

/// Simple in-memory remote collection for testing cache implementations.
///
/// Cloning shares the same server state, so a test can keep a handle while
/// the cache owns another.
///
/// Each call is processed when it is issued and answered after the scripted
/// delay, like a request whose response is slow to come back. A scripted
/// failure leaves the server state untouched.
pub struct InMemoryRemote<T: Resource> {
    inner: Arc<RemoteInner<T>>,
}

impl<T: Resource> Clone for InMemoryRemote<T> {
    fn clone(&self) -> Self {
        InMemoryRemote {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Resource> InMemoryRemote<T> {
    /// Create an empty remote. `factory` builds the stored entity from the
    /// server-assigned id and the create payload.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(u64, &T::Draft) -> T + Send + Sync + 'static,
    {
        InMemoryRemote {
            inner: Arc::new(RemoteInner {
                records: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                factory: Box::new(factory),
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start server-side id assignment at `id`.
    pub fn with_next_id(self, id: u64) -> Self {
        self.inner.next_id.store(id, Ordering::SeqCst);
        self
    }

    /// Insert or replace an active entity directly on the "server".
    pub fn insert(&self, entity: T) {
        let key = entity.resource_key();
        let mut records = self.records();
        match records.iter_mut().find(|r| r.entity.resource_key() == key) {
            Some(record) => {
                record.entity = entity;
                record.deleted = false;
            }
            None => records.push(Record {
                entity,
                deleted: false,
            }),
        }
    }

    /// Soft delete directly on the "server".
    pub fn mark_deleted(&self, key: &T::Key) -> bool {
        self.records()
            .iter_mut()
            .find(|r| r.entity.resource_key() == *key)
            .map(|r| r.deleted = true)
            .is_some()
    }

    pub fn is_deleted(&self, key: &T::Key) -> bool {
        self.records()
            .iter()
            .any(|r| r.deleted && r.entity.resource_key() == *key)
    }

    /// Current server-side value of an active entity.
    pub fn get(&self, key: &T::Key) -> Option<T> {
        self.records()
            .iter()
            .find(|r| !r.deleted && r.entity.resource_key() == *key)
            .map(|r| r.entity.clone())
    }

    /// Number of active entities.
    pub fn len(&self) -> usize {
        self.records().iter().filter(|r| !r.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delay the response of the next call of `op`.
    pub fn delay_next(&self, op: RemoteOp, delay: Duration) {
        self.push_step(
            op,
            Step {
                delay: Some(delay),
                failure: None,
            },
        );
    }

    /// Fail the next call of `op` with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: Error) {
        self.push_step(
            op,
            Step {
                delay: None,
                failure: Some(error),
            },
        );
    }

    /// Fail the next call of `op` after `delay`.
    pub fn fail_next_after(&self, op: RemoteOp, delay: Duration, error: Error) {
        self.push_step(
            op,
            Step {
                delay: Some(delay),
                failure: Some(error),
            },
        );
    }

    /// Number of calls of `op` received so far.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock_calls().get(&op).copied().unwrap_or(0)
    }

    fn push_step(&self, op: RemoteOp, step: Step) {
        self.inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default()
            .push_back(step);
    }

    /// Count the call and take its scripted step.
    fn receive(&self, op: RemoteOp) -> Step {
        *self.lock_calls().entry(op).or_insert(0) += 1;
        self.inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<Record<T>>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_calls(&self) -> MutexGuard<'_, HashMap<RemoteOp, usize>> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(key: &T::Key) -> Error {
        Error::NotFound(KeyLabel::build::<T>(key))
    }
}

impl<T: Resource> RemoteCollection<T> for InMemoryRemote<T> {
    async fn fetch_all(&self) -> Result<Vec<T>> {
        let step = self.receive(RemoteOp::FetchAll);
        step.rejected().await?;

        // Data as of the moment the request was received.
        let entities: Vec<T> = self
            .records()
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| r.entity.clone())
            .collect();
        step.wait().await;
        Ok(entities)
    }

    async fn fetch_one(&self, key: &T::Key) -> Result<T> {
        let step = self.receive(RemoteOp::FetchOne);
        step.rejected().await?;

        let found = self.get(key);
        step.wait().await;
        found.ok_or_else(|| Self::not_found(key))
    }

    async fn create(&self, draft: &T::Draft) -> Result<T> {
        let step = self.receive(RemoteOp::Create);
        step.rejected().await?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let entity = (self.inner.factory)(id, draft);
        self.records().push(Record {
            entity: entity.clone(),
            deleted: false,
        });
        step.wait().await;
        Ok(entity)
    }

    async fn update(&self, entity: &T) -> Result<Option<T>> {
        let step = self.receive(RemoteOp::Update);
        step.rejected().await?;

        let key = entity.resource_key();
        let updated = {
            let mut records = self.records();
            match records
                .iter_mut()
                .find(|r| !r.deleted && r.entity.resource_key() == key)
            {
                Some(record) => {
                    record.entity = entity.clone();
                    true
                }
                None => false,
            }
        };

        step.wait().await;
        if updated {
            Ok(Some(entity.clone()))
        } else {
            Err(Self::not_found(&key))
        }
    }

    async fn delete(&self, key: &T::Key) -> Result<()> {
        let step = self.receive(RemoteOp::Delete);
        step.rejected().await?;

        let deleted = self
            .records()
            .iter_mut()
            .find(|r| !r.deleted && r.entity.resource_key() == *key)
            .map(|r| r.deleted = true)
            .is_some();

        step.wait().await;
        if deleted {
            Ok(())
        } else {
            Err(Self::not_found(key))
        }
    }

    async fn restore(&self, key: &T::Key) -> Result<()> {
        let step = self.receive(RemoteOp::Restore);
        step.rejected().await?;

        let found = self
            .records()
            .iter_mut()
            .find(|r| r.entity.resource_key() == *key)
            .map(|r| r.deleted = false)
            .is_some();

        step.wait().await;
        if found {
            Ok(())
        } else {
            Err(Self::not_found(key))
        }
    }
}
