//! Read strategies for loading a collection.
//!
//! # The Three Strategies
//!
//! ```
//! use resource_cache::strategy::FetchStrategy;
//!
//! // 1. Fresh - Use the local snapshot only
//! let _s = FetchStrategy::Fresh;
//!
//! // 2. Refresh - Fetch only when never loaded, failed, or stale (default)
//! let _s = FetchStrategy::Refresh;
//!
//! // 3. Invalidate - Always fetch from the remote
//! let _s = FetchStrategy::Invalidate;
//! ```
//!
//! | Strategy | Loaded & fresh | Loaded & stale | Idle / Error |
//! |----------|----------------|----------------|--------------|
//! | **Fresh** | Snapshot | Snapshot | Snapshot |
//! | **Refresh** | Snapshot | Fetch | Fetch |
//! | **Invalidate** | Fetch | Fetch | Fetch |
//!
//! Staleness is governed by `CacheConfig::stale_after`.

use crate::store::CollectionStatus;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Strategy controlling whether a load contacts the remote collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FetchStrategy {
    /// **Fresh**: never contact the remote; serve whatever the store holds.
    Fresh,

    /// **Refresh**: fetch when the collection was never loaded, is in
    /// `Error`, or its last fetch is older than `stale_after`.
    ///
    /// Avoids redundant re-fetches when several consumers ask for the same
    /// collection.
    #[default]
    Refresh,

    /// **Invalidate**: always fetch, e.g. after an external change.
    Invalidate,
}

impl FetchStrategy {
    /// Decide whether a load with this strategy must fetch.
    pub fn should_fetch(
        &self,
        status: CollectionStatus,
        last_fetched_at: Option<DateTime<Utc>>,
        stale_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> bool {
        match self {
            FetchStrategy::Fresh => false,
            FetchStrategy::Invalidate => true,
            FetchStrategy::Refresh => match status {
                CollectionStatus::Idle | CollectionStatus::Error => true,
                // A fetch is already in flight; its result will land.
                CollectionStatus::Loading => false,
                CollectionStatus::Loaded => match (last_fetched_at, stale_after) {
                    (None, _) => true,
                    (Some(_), None) => false,
                    (Some(at), Some(max_age)) => {
                        let age = now.signed_duration_since(at);
                        age.to_std().map_or(false, |age| age >= max_age)
                    }
                },
            },
        }
    }
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::Fresh => write!(f, "Fresh"),
            FetchStrategy::Refresh => write!(f, "Refresh"),
            FetchStrategy::Invalidate => write!(f, "Invalidate"),
        }
    }
}
