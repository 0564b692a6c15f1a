//! Medication catalogue.

use super::Validator;
use crate::entity::{Resource, ResourceDraft, UniqueField};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A catalogue entry. The API shape maps one to one, so this type is its
/// own DTO.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub id: u64,
    pub commercial_name: String,
    pub active_ingredient: String,
    pub presentation: String,
    pub laboratory: String,
    #[serde(default, rename = "isDeleted")]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Create payload (also the form data).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationDraft {
    pub commercial_name: String,
    pub active_ingredient: String,
    pub presentation: String,
    pub laboratory: String,
}

impl MedicationDraft {
    /// The stored medication for `id`, as a server would build it.
    pub fn into_medication(self, id: u64) -> Medication {
        Medication {
            id,
            commercial_name: self.commercial_name.trim().to_string(),
            active_ingredient: self.active_ingredient.trim().to_string(),
            presentation: self.presentation,
            laboratory: self.laboratory,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: Some(Utc::now()),
            updated_at: None,
        }
    }
}

/// Update payload of the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMedicationDto {
    pub id: u64,
    pub commercial_name: String,
    pub active_ingredient: String,
    pub presentation: String,
    pub laboratory: String,
}

impl From<&Medication> for UpdateMedicationDto {
    fn from(m: &Medication) -> Self {
        UpdateMedicationDto {
            id: m.id,
            commercial_name: m.commercial_name.clone(),
            active_ingredient: m.active_ingredient.clone(),
            presentation: m.presentation.clone(),
            laboratory: m.laboratory.clone(),
        }
    }
}

fn validate_medication(
    commercial_name: &str,
    active_ingredient: &str,
    presentation: &str,
    laboratory: &str,
) -> Result<()> {
    Validator::new()
        .length("commercialName", commercial_name, 2, 100)
        .length("activeIngredient", active_ingredient, 2, 100)
        .required("presentation", presentation)
        .required("laboratory", laboratory)
        .finish()
}

impl Resource for Medication {
    type Key = u64;
    type Draft = MedicationDraft;

    fn resource_key(&self) -> Self::Key {
        self.id
    }

    fn resource_kind() -> &'static str {
        "medication"
    }

    fn validate(&self) -> Result<()> {
        validate_medication(
            &self.commercial_name,
            &self.active_ingredient,
            &self.presentation,
            &self.laboratory,
        )
    }

    fn unique_fields(&self) -> Vec<UniqueField> {
        vec![UniqueField::case_insensitive(
            "commercialName",
            &self.commercial_name,
        )]
    }
}

impl ResourceDraft for MedicationDraft {
    fn validate(&self) -> Result<()> {
        validate_medication(
            &self.commercial_name,
            &self.active_ingredient,
            &self.presentation,
            &self.laboratory,
        )
    }

    fn unique_fields(&self) -> Vec<UniqueField> {
        vec![UniqueField::case_insensitive(
            "commercialName",
            &self.commercial_name,
        )]
    }
}

// ============================================================================
// Queries over a loaded catalogue
// ============================================================================

/// List filter of the catalogue screen.
///
/// `None` for presentation or laboratory means "all".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MedicationFilter {
    pub search: String,
    pub presentation: Option<String>,
    pub laboratory: Option<String>,
}

/// `"all"` (the select's catch-all option) and blank mean no restriction.
fn choice(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(value.to_string())
    }
}

impl MedicationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_presentation(mut self, presentation: &str) -> Self {
        self.presentation = choice(presentation);
        self
    }

    pub fn with_laboratory(mut self, laboratory: &str) -> Self {
        self.laboratory = choice(laboratory);
        self
    }

    /// Search is a case-insensitive substring match on commercial name,
    /// active ingredient or laboratory; presentation and laboratory match
    /// exactly.
    pub fn matches(&self, m: &Medication) -> bool {
        let needle = self.search.to_lowercase();
        let matches_search = [&m.commercial_name, &m.active_ingredient, &m.laboratory]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));

        matches_search
            && self
                .presentation
                .as_ref()
                .map_or(true, |p| *p == m.presentation)
            && self
                .laboratory
                .as_ref()
                .map_or(true, |l| *l == m.laboratory)
    }

    pub fn apply(&self, medications: &[Medication]) -> Vec<Medication> {
        medications
            .iter()
            .filter(|m| self.matches(m))
            .cloned()
            .collect()
    }
}

/// Sorted, de-duplicated presentations.
pub fn distinct_presentations(medications: &[Medication]) -> Vec<String> {
    medications
        .iter()
        .map(|m| m.presentation.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Sorted, de-duplicated laboratories.
pub fn distinct_laboratories(medications: &[Medication]) -> Vec<String> {
    medications
        .iter()
        .map(|m| m.laboratory.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Whether `name` is already used by another medication (case-insensitive).
pub fn commercial_name_exists(
    medications: &[Medication],
    name: &str,
    exclude: Option<u64>,
) -> bool {
    let candidate = UniqueField::case_insensitive("commercialName", name);
    medications
        .iter()
        .filter(|m| Some(m.id) != exclude)
        .flat_map(Resource::unique_fields)
        .any(|theirs| candidate.collides_with(&theirs))
}

/// Which part of the catalogue a listing requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MedicationState {
    #[default]
    Active,
    Inactive,
    All,
}

impl MedicationState {
    pub fn as_query(&self) -> &'static str {
        match self {
            MedicationState::Active => "active",
            MedicationState::Inactive => "inactive",
            MedicationState::All => "all",
        }
    }

    /// `state` query parameter; the API lists active entries without one.
    pub fn query_param(&self) -> Option<&'static str> {
        match self {
            MedicationState::Active => None,
            other => Some(other.as_query()),
        }
    }

    pub fn includes(&self, m: &Medication) -> bool {
        match self {
            MedicationState::Active => !m.deleted,
            MedicationState::Inactive => m.deleted,
            MedicationState::All => true,
        }
    }
}

impl FromStr for MedicationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(MedicationState::Active),
            "inactive" => Ok(MedicationState::Inactive),
            "all" => Ok(MedicationState::All),
            other => Err(super::unknown_value("state", other)),
        }
    }
}

impl fmt::Display for MedicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query())
    }
}

/// Decode a medication list response.
///
/// # Errors
/// `Error::Network` for malformed JSON.
pub fn decode_medications(json: &str) -> Result<Vec<Medication>> {
    Ok(serde_json::from_str(json)?)
}

pub fn decode_medication(json: &str) -> Result<Medication> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn med(id: u64, name: &str, ingredient: &str, presentation: &str, lab: &str) -> Medication {
        MedicationDraft {
            commercial_name: name.to_string(),
            active_ingredient: ingredient.to_string(),
            presentation: presentation.to_string(),
            laboratory: lab.to_string(),
        }
        .into_medication(id)
    }

    fn catalogue() -> Vec<Medication> {
        vec![
            med(1, "Amoxil", "Amoxicilina", "Tableta", "Bayer"),
            med(2, "Meloxivet", "Meloxicam", "Inyectable", "Zoetis"),
            med(3, "Ivomec", "Ivermectina", "Inyectable", "Boehringer"),
            med(4, "Drontal", "Praziquantel", "Tableta", "Bayer"),
        ]
    }

    fn ids(items: &[Medication]) -> Vec<u64> {
        items.iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_filter_search_is_case_insensitive() {
        let items = catalogue();

        let by_name = MedicationFilter::new().with_search("AMOX");
        assert_eq!(ids(&by_name.apply(&items)), vec![1]);

        let by_ingredient = MedicationFilter::new().with_search("meloxicam");
        assert_eq!(ids(&by_ingredient.apply(&items)), vec![2]);

        let by_lab = MedicationFilter::new().with_search("bayer");
        assert_eq!(ids(&by_lab.apply(&items)), vec![1, 4]);

        assert_eq!(MedicationFilter::new().apply(&items).len(), 4);
    }

    #[test]
    fn test_filter_presentation_and_laboratory() {
        let items = catalogue();

        let filter = MedicationFilter::new()
            .with_presentation("Inyectable")
            .with_laboratory("all");
        assert_eq!(ids(&filter.apply(&items)), vec![2, 3]);

        let filter = MedicationFilter::new()
            .with_presentation("Tableta")
            .with_laboratory("Bayer")
            .with_search("dront");
        assert_eq!(ids(&filter.apply(&items)), vec![4]);
    }

    #[test]
    fn test_distinct_values() {
        let items = catalogue();
        assert_eq!(distinct_presentations(&items), vec!["Inyectable", "Tableta"]);
        assert_eq!(
            distinct_laboratories(&items),
            vec!["Bayer", "Boehringer", "Zoetis"]
        );
        assert!(distinct_laboratories(&[]).is_empty());
    }

    #[test]
    fn test_commercial_name_exists() {
        let items = catalogue();
        assert!(commercial_name_exists(&items, "amoxil", None));
        assert!(commercial_name_exists(&items, " IVOMEC ", None));
        assert!(!commercial_name_exists(&items, "amoxil", Some(1)));
        assert!(!commercial_name_exists(&items, "Nuevo", None));
    }

    #[test]
    fn test_state_query() {
        assert_eq!(MedicationState::default(), MedicationState::Active);
        assert_eq!(MedicationState::Active.query_param(), None);
        assert_eq!(MedicationState::Inactive.query_param(), Some("inactive"));
        assert_eq!("all".parse::<MedicationState>().expect("state"), MedicationState::All);
        assert!("deleted".parse::<MedicationState>().is_err());

        let mut gone = med(9, "Viejo", "Nada", "Jarabe", "X");
        gone.deleted = true;
        assert!(MedicationState::Inactive.includes(&gone));
        assert!(!MedicationState::Active.includes(&gone));
        assert!(MedicationState::All.includes(&gone));
    }

    #[test]
    fn test_validation() {
        let draft = MedicationDraft {
            commercial_name: "A".to_string(),
            active_ingredient: "Meloxicam".to_string(),
            presentation: String::new(),
            laboratory: "Zoetis".to_string(),
        };
        let err = draft.validate().expect_err("invalid");
        let fields = err.field_errors().expect("validation");
        assert!(fields.contains_key("commercialName"));
        assert!(fields.contains_key("presentation"));
        assert!(!fields.contains_key("laboratory"));
    }

    #[test]
    fn test_decode_medications() {
        let json = r#"[
            {"id": 1, "commercialName": "Amoxil", "activeIngredient": "Amoxicilina",
             "presentation": "Tableta", "laboratory": "Bayer",
             "createdAt": "2024-01-01T08:00:00Z"},
            {"id": 2, "commercialName": "Viejo", "activeIngredient": "X",
             "presentation": "Jarabe", "laboratory": "Y", "isDeleted": true,
             "deletedBy": "admin"}
        ]"#;

        let items = decode_medications(json).expect("Failed to decode");
        assert_eq!(items.len(), 2);
        assert!(!items[0].deleted);
        assert!(items[0].created_at.is_some());
        assert!(items[1].deleted);
        assert_eq!(items[1].deleted_by.as_deref(), Some("admin"));

        assert!(matches!(decode_medication("nope"), Err(Error::Network(_))));

        let update = UpdateMedicationDto::from(&items[0]);
        let value = serde_json::to_value(&update).expect("Failed to serialize");
        assert_eq!(value["commercialName"], "Amoxil");
        assert!(value.get("isDeleted").is_none());
    }
}
