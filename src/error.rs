//! Error types for the resource cache.

use std::collections::BTreeMap;
use std::fmt;

/// Result type for cache and remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Per-field validation messages, keyed by field name.
///
/// Ordered so that flattened messages come out deterministically.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Error types for the resource cache.
///
/// Remote collaborators report failures with these variants, and the mutator
/// attaches them to the collection state as its `ErrorInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Validation failed, either server-side or in a client pre-flight check.
    ///
    /// Carries human-readable messages per field. Uniqueness conflicts
    /// (duplicate document id, duplicate commercial name, ...) are reported
    /// through this variant on the conflicting field.
    ///
    /// **Recovery:** Never retried automatically; fix the input.
    Validation(FieldErrors),

    /// The target key does not exist server-side.
    ///
    /// Optimistic updates and deletes roll back when they hit this.
    NotFound(String),

    /// Transport failure: unreachable host, timeout or malformed response.
    ///
    /// **Recovery:** Safe to retry manually.
    Network(String),

    /// Operation not supported by this remote collaborator.
    ///
    /// Returned by the default `restore` of collections without soft delete.
    NotImplemented(String),

    /// Invalid cache configuration.
    Config(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Build a validation error with a single message on one field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.into(), vec![message.into()]);
        Error::Validation(fields)
    }

    /// Build the error reported for a uniqueness violation on `field`.
    pub fn conflict(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::validation(field, message)
    }

    /// Per-field messages, when this is a validation error.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Error::Validation(fields) => Some(fields),
            _ => None,
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Single human-readable message.
    ///
    /// Validation errors are flattened into all their messages joined by `", "`.
    pub fn message(&self) -> String {
        match self {
            Error::Validation(fields) => fields
                .values()
                .flatten()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            Error::NotFound(msg)
            | Error::Network(msg)
            | Error::NotImplemented(msg)
            | Error::Config(msg)
            | Error::Other(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(_) => write!(f, "Validation error: {}", self.message()),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Network(msg) => write!(f, "Network error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

/// A payload that cannot be decoded is a malformed response, i.e. a transport
/// failure from the cache's point of view.
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Network(format!("malformed response: {}", e))
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}
