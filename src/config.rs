//! Cache configuration.

use std::time::Duration;

/// Setup-time configuration of a `ResourceCache`.
///
/// # Example
///
/// ```
/// use resource_cache::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::default()
///     .with_stale_after(Duration::from_secs(60))
///     .with_preflight_conflicts(false);
///
/// assert_eq!(config.stale_after, Some(Duration::from_secs(60)));
/// assert!(!config.preflight_conflicts);
/// assert!(config.validate_before_send);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age after which `FetchStrategy::Refresh` fetches again.
    ///
    /// `None` means a loaded collection never goes stale on its own.
    pub stale_after: Option<Duration>,

    /// Check unique fields against the current snapshot before sending a
    /// create or update. Best effort only; the server stays the authority.
    pub preflight_conflicts: bool,

    /// Run `Resource::validate` / `ResourceDraft::validate` before sending.
    pub validate_before_send: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            stale_after: None,
            preflight_conflicts: true,
            validate_before_send: true,
        }
    }
}

impl CacheConfig {
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn with_preflight_conflicts(mut self, enabled: bool) -> Self {
        self.preflight_conflicts = enabled;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_before_send = enabled;
        self
    }
}
