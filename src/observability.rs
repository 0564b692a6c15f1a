//! Observability hooks for cache operations.
//!
//! Implement [`CacheMetrics`] to feed fetch and mutation statistics into your
//! monitoring system:
//!
//! ```ignore
//! use resource_cache::observability::CacheMetrics;
//! use resource_cache::{MutationKind, ResourceCache};
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_rollback(&self, key: &str, kind: MutationKind) {
//!         // counter!("cache_rollbacks", "kind" => kind.to_string()).inc();
//!     }
//!     // ... implement other methods
//! }
//!
//! let cache = ResourceCache::with_metrics(remote, Box::new(PrometheusMetrics));
//! ```
//!
//! Unimplemented methods fall back to logging through the `log` crate. The
//! default for a new cache is [`NoOpMetrics`], which records nothing.
//!
//! All methods receive the key label (`"{kind}:{key}"`, or `"{kind}:*"` for
//! collection-wide operations).

use crate::error::Error;
use crate::pending::MutationKind;
use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a fetch that was applied to the store.
    fn record_fetch(&self, key: &str, entities: usize, duration: Duration) {
        debug!("Cache FETCH: {} ({} entities) took {:?}", key, entities, duration);
    }

    /// Record a fetch result discarded because a newer fetch was issued.
    fn record_stale_fetch(&self, key: &str, sequence: u64) {
        debug!("Cache STALE FETCH: {} #{} discarded", key, sequence);
    }

    /// Record a mutation confirmed by the remote.
    fn record_mutation(&self, key: &str, kind: MutationKind, duration: Duration) {
        debug!("Cache {}: {} took {:?}", kind, key, duration);
    }

    /// Record an optimistic change undone after a remote failure.
    fn record_rollback(&self, key: &str, kind: MutationKind) {
        warn!("Cache ROLLBACK {}: {}", kind, key);
    }

    /// Record an error.
    fn record_error(&self, key: &str, error: &Error) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_fetch(&self, _key: &str, _entities: usize, _duration: Duration) {}
    fn record_stale_fetch(&self, _key: &str, _sequence: u64) {}
    fn record_mutation(&self, _key: &str, _kind: MutationKind, _duration: Duration) {}
    fn record_rollback(&self, _key: &str, _kind: MutationKind) {}
    fn record_error(&self, _key: &str, _error: &Error) {}
}

/// Metrics that only log (the trait's default behaviour).
#[derive(Clone, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {}
