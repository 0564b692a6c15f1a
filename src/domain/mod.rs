//! Clinic back-office entities: customers, patients and medications.
//!
//! Each entity comes with the wire DTOs of the clinic API (camelCase JSON),
//! pure mapping functions between DTO and domain value, and a `Resource`
//! implementation so it can be cached with [`crate::ResourceCache`].
//!
//! Enumerated wire values (`"Domestic"`, `"InDebt"`, ...) are checked when a
//! DTO is mapped; an unknown value is a `Error::Validation` on that field.

pub mod customer;
pub mod medication;
pub mod patient;

use crate::error::{Error, FieldErrors, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;

/// Accumulates per-field messages for `validate` implementations.
#[derive(Debug, Default)]
pub(crate) struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn check(mut self, ok: bool, field: &str, message: &str) -> Self {
        if !ok {
            self.errors
                .entry(field.to_string())
                .or_default()
                .push(message.to_string());
        }
        self
    }

    pub(crate) fn required(self, field: &str, value: &str) -> Self {
        self.check(
            !value.trim().is_empty(),
            field,
            &format!("{} is required", field),
        )
    }

    /// Trimmed length in characters within `min..=max`.
    pub(crate) fn length(self, field: &str, value: &str, min: usize, max: usize) -> Self {
        let len = value.trim().chars().count();
        self.check(
            (min..=max).contains(&len),
            field,
            &format!("{} must be between {} and {} characters", field, min, max),
        )
    }

    pub(crate) fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self.errors))
        }
    }
}

/// Rejection of an enumerated wire or label value.
pub(crate) fn unknown_value(field: &str, value: &str) -> Error {
    Error::validation(field, format!("unknown {} '{}'", field, value))
}

/// Calendar date of an API timestamp.
///
/// Accepts RFC 3339 (converted to UTC), a naive `YYYY-MM-DDTHH:MM:SS[.fff]`
/// or a bare `YYYY-MM-DD`.
pub(crate) fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc).date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(at.date());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| Error::validation(field, format!("invalid date '{}'", value)))
}

/// Optional timestamp; blank counts as absent.
pub(crate) fn parse_optional_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value {
        Some(v) if !v.trim().is_empty() => parse_date(field, v).map(Some),
        _ => Ok(None),
    }
}

/// Midnight UTC timestamp of `date`, as the API expects it.
pub(crate) fn format_date(date: NaiveDate) -> String {
    format!("{}T00:00:00Z", date.format("%Y-%m-%d"))
}

/// `None` for blank strings, the trimmed value otherwise.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Decode a JSON array of DTOs and map each one.
///
/// # Errors
/// `Error::Network` for malformed JSON, `Error::Validation` for DTOs that do
/// not map.
pub(crate) fn decode_list<D, E>(json: &str) -> Result<Vec<E>>
where
    D: DeserializeOwned,
    E: TryFrom<D, Error = Error>,
{
    let dtos: Vec<D> = serde_json::from_str(json)?;
    dtos.into_iter().map(E::try_from).collect()
}

/// Decode one JSON DTO and map it.
///
/// # Errors
/// Same as [`decode_list`].
pub(crate) fn decode_one<D, E>(json: &str) -> Result<E>
where
    D: DeserializeOwned,
    E: TryFrom<D, Error = Error>,
{
    let dto: D = serde_json::from_str(json)?;
    E::try_from(dto)
}
