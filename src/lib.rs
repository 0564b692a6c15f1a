//! # resource-cache
//!
//! An in-memory, async cache of server-backed entity collections with
//! optimistic mutations and precise rollback.
//!
//! ## Features
//!
//! - **Fully Generic:** Cache any type `T` that implements [`Resource`]
//! - **Remote Agnostic:** The server is a [`RemoteCollection`]; HTTP, gRPC or
//!   a test double all fit
//! - **Optimistic Writes:** Updates and deletes show immediately and roll back
//!   to the exact previous value and position when the server refuses them
//! - **Ordered Fetches:** Overlapping fetches resolve by issue order, never by
//!   arrival order
//! - **Observable:** Synchronous listeners receive one shared snapshot per
//!   change; a panicking listener cannot hurt the others
//! - **Production Ready:** Built-in logging, metrics hooks and a typed error
//!   taxonomy
//!
//! ## Quick Start
//!
//! ```ignore
//! use resource_cache::{ResourceCache, FetchStrategy, InMemoryRemote};
//! use resource_cache::domain::medication::{Medication, MedicationDraft};
//!
//! // 1. Any RemoteCollection<Medication> (here the in-memory double)
//! let remote = InMemoryRemote::new(|id, draft: &MedicationDraft| draft.clone().into_medication(id));
//!
//! // 2. One cache per collection; clones share state
//! let medications = ResourceCache::new(remote);
//!
//! // 3. Observe
//! let sub = medications.subscribe(|snapshot| {
//!     println!("{} medications, {}", snapshot.len(), snapshot.status);
//! });
//!
//! // 4. Read and mutate; failures come back as false/None plus `error()`
//! medications.load(FetchStrategy::Refresh).await;
//! if !medications.delete(&3).await {
//!     eprintln!("{}", medications.error().map(|e| e.message()).unwrap_or_default());
//! }
//!
//! sub.unsubscribe();
//! medications.dispose();
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod domain;
pub mod entity;
pub mod error;
pub mod key;
pub mod mutator;
pub mod observability;
pub mod pending;
pub mod remote;
pub mod service;
pub mod store;
pub mod strategy;
pub mod subscriber;

// Re-exports for convenience
pub use config::CacheConfig;
pub use entity::{Resource, ResourceDraft, UniqueField};
pub use error::{Error, FieldErrors, Result};
pub use mutator::Mutator;
pub use observability::{CacheMetrics, LogMetrics, NoOpMetrics};
pub use pending::{MutationKind, PendingMutation};
pub use remote::{InMemoryRemote, RemoteCollection, RemoteOp};
pub use service::ResourceCache;
pub use store::{CollectionSnapshot, CollectionStatus, Store};
pub use strategy::FetchStrategy;
pub use subscriber::Subscription;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
