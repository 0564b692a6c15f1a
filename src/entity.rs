//! Core traits that all cached resources must implement.

use crate::error::{Error, Result};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Trait that every entity held by a `ResourceCache` must implement.
///
/// The cache is agnostic to entity shape: it only needs the key extractor, a
/// kind name for logs, and optionally client-side validation and the list of
/// fields that must be unique across the collection.
///
/// # Example
///
/// ```
/// use resource_cache::{Resource, ResourceDraft};
///
/// #[derive(Clone, Debug, PartialEq)]
/// pub struct Species {
///     pub id: u64,
///     pub name: String,
/// }
///
/// pub struct SpeciesDraft {
///     pub name: String,
/// }
///
/// impl ResourceDraft for SpeciesDraft {}
///
/// impl Resource for Species {
///     type Key = u64;
///     type Draft = SpeciesDraft;
///
///     fn resource_key(&self) -> Self::Key {
///         self.id
///     }
///
///     fn resource_kind() -> &'static str {
///         "species"
///     }
/// }
/// ```
pub trait Resource: Clone + Send + Sync + 'static {
    /// Type of the entity's key, assigned by the server.
    type Key: Display + Debug + Clone + Send + Sync + Eq + Hash + 'static;

    /// Payload used to create a new entity (no key yet).
    type Draft: ResourceDraft;

    /// Return the entity's unique key.
    fn resource_key(&self) -> Self::Key;

    /// Return the kind name of this entity type, e.g. "customer".
    ///
    /// Used to label keys in logs and metrics: `"{kind}:{key}"`.
    fn resource_kind() -> &'static str;

    /// Optional: client-side validation run before an update is sent.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Optional: fields that must be unique across the collection.
    fn unique_fields(&self) -> Vec<UniqueField> {
        Vec::new()
    }
}

/// Trait for create payloads.
pub trait ResourceDraft: Send + Sync {
    /// Optional: client-side validation run before a create is sent.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Optional: fields that must be unique across the collection.
    fn unique_fields(&self) -> Vec<UniqueField> {
        Vec::new()
    }
}

/// A field value that must not collide with any other entity's value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueField {
    /// Field name, as reported in validation errors.
    pub field: &'static str,
    /// Value to compare.
    pub value: String,
    /// Compare ignoring ASCII/Unicode case.
    pub case_insensitive: bool,
}

impl UniqueField {
    /// Exact-match unique field.
    pub fn new(field: &'static str, value: impl Into<String>) -> Self {
        UniqueField {
            field,
            value: value.into(),
            case_insensitive: false,
        }
    }

    /// Case-insensitive unique field.
    pub fn case_insensitive(field: &'static str, value: impl Into<String>) -> Self {
        UniqueField {
            field,
            value: value.into(),
            case_insensitive: true,
        }
    }

    fn normalized(&self) -> String {
        let trimmed = self.value.trim();
        if self.case_insensitive {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        }
    }

    /// Whether two values of the same field collide. Blank values never do.
    pub fn collides_with(&self, other: &UniqueField) -> bool {
        if self.field != other.field || self.value.trim().is_empty() {
            return false;
        }
        self.normalized() == other.normalized()
    }
}

/// Check `candidate` against `existing` entities, skipping the entity with
/// `exclude` key (the one being updated).
///
/// Returns a conflict error for the first colliding field.
pub(crate) fn find_conflict<T: Resource>(
    candidate: &[UniqueField],
    existing: &[T],
    exclude: Option<&T::Key>,
) -> Result<()> {
    if candidate.is_empty() {
        return Ok(());
    }

    for entity in existing {
        if exclude.is_some_and(|key| *key == entity.resource_key()) {
            continue;
        }
        for theirs in entity.unique_fields() {
            if let Some(ours) = candidate.iter().find(|f| f.collides_with(&theirs)) {
                return Err(Error::conflict(
                    ours.field,
                    format!("{} '{}' already exists", ours.field, ours.value.trim()),
                ));
            }
        }
    }

    Ok(())
}
