//! Patients: the animals treated by the clinic.

use super::{
    decode_list, decode_one, format_date, non_blank, parse_date, parse_optional_date,
    unknown_value, Validator,
};
use crate::entity::{Resource, ResourceDraft};
use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registration author when the API leaves it blank.
pub const DEFAULT_REGISTERED_BY: &str = "Sistema";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::Unknown];

    pub fn as_wire(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Unknown => "Unknown",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Gender::Male => "Macho",
            Gender::Female => "Hembra",
            Gender::Unknown => "Desconocido",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.label() == label)
            .ok_or_else(|| unknown_value("gender", label))
    }
}

impl FromStr for Gender {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_wire() == s)
            .ok_or_else(|| unknown_value("gender", s))
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Classification {
    Domestic,
    Farm,
}

impl Classification {
    pub const ALL: [Classification; 2] = [Classification::Domestic, Classification::Farm];

    pub fn as_wire(&self) -> &'static str {
        match self {
            Classification::Domestic => "Domestic",
            Classification::Farm => "Farm",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::Domestic => "Doméstico",
            Classification::Farm => "Granja",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.label() == label)
            .ok_or_else(|| unknown_value("classification", label))
    }
}

impl FromStr for Classification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_wire() == s)
            .ok_or_else(|| unknown_value("classification", s))
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Owner contact details embedded in a patient record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerSummary {
    pub customer_id: u64,
    pub full_name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Patient {
    pub id: u64,
    pub name: String,
    pub species: String,
    pub breed: String,
    pub gender: Gender,
    pub birth_date: Option<NaiveDate>,
    /// Age reported by the server, used when there is no birth date.
    pub server_age: u32,
    pub weight: f64,
    pub classification: Classification,
    pub photo_url: Option<String>,
    pub registered_on: NaiveDate,
    pub registered_by: String,
    pub customer_id: u64,
    pub owner: Option<OwnerSummary>,
    pub deleted: bool,
    pub deleted_on: Option<NaiveDate>,
    pub deleted_by: Option<String>,
    pub updated_on: Option<NaiveDate>,
}

/// Whole years from `birth` to `today`, never negative.
fn years_between(birth: NaiveDate, today: NaiveDate) -> u32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    u32::try_from(age).unwrap_or(0)
}

impl Patient {
    /// Age in years on `today`: from the birth date if known, else the
    /// server's value.
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        self.birth_date
            .map(|birth| years_between(birth, today))
            .unwrap_or(self.server_age)
    }

    /// One-line description, e.g. `"Firulais - Perro (Mestizo) - 3 años"`.
    pub fn summary(&self, today: NaiveDate) -> String {
        format!(
            "{} - {} ({}) - {} años",
            self.name,
            self.species,
            self.breed,
            self.age_on(today)
        )
    }
}

/// Patients not soft-deleted, in their original order.
pub fn active_only(patients: &[Patient]) -> Vec<Patient> {
    patients.iter().filter(|p| !p.deleted).cloned().collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatientDraft {
    pub name: String,
    pub species: String,
    pub breed: String,
    pub gender: Gender,
    pub birth_date: Option<NaiveDate>,
    pub weight: f64,
    pub classification: Classification,
    pub photo_url: Option<String>,
    pub customer_id: u64,
}

fn validate_patient(name: &str, species: &str, breed: &str, weight: f64) -> Result<()> {
    Validator::new()
        .length("animalName", name, 2, 50)
        .required("species", species)
        .required("breed", breed)
        .check(
            (0.1..=1000.0).contains(&weight),
            "weight",
            "weight must be between 0.1 and 1000 kg",
        )
        .finish()
}

impl Resource for Patient {
    type Key = u64;
    type Draft = PatientDraft;

    fn resource_key(&self) -> Self::Key {
        self.id
    }

    fn resource_kind() -> &'static str {
        "patient"
    }

    fn validate(&self) -> Result<()> {
        validate_patient(&self.name, &self.species, &self.breed, self.weight)
    }
}

impl ResourceDraft for PatientDraft {
    fn validate(&self) -> Result<()> {
        validate_patient(&self.name, &self.species, &self.breed, self.weight)
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Owner block nested in [`PatientDto`]. Only the fields the cache keeps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientOwnerDto {
    pub customer_id: u64,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDto {
    pub patient_id: u64,
    pub animal_name: String,
    pub species: String,
    #[serde(default)]
    pub breed: Option<String>,
    pub gender: String,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub weight: Option<f64>,
    pub classification: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub registered_at: String,
    #[serde(default)]
    pub registered_by: Option<String>,
    pub customer_id: u64,
    #[serde(default)]
    pub customer: Option<PatientOwnerDto>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default)]
    pub deleted_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientDto {
    pub animal_name: String,
    pub species: String,
    pub breed: String,
    pub gender: String,
    pub birth_date: String,
    pub weight: f64,
    pub classification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub customer_id: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientDto {
    pub patient_id: u64,
    #[serde(flatten)]
    pub fields: CreatePatientDto,
}

impl TryFrom<PatientDto> for Patient {
    type Error = Error;

    fn try_from(dto: PatientDto) -> Result<Self> {
        Ok(Patient {
            id: dto.patient_id,
            gender: dto.gender.parse()?,
            classification: dto.classification.parse()?,
            birth_date: parse_optional_date("birthDate", dto.birth_date.as_deref())?,
            registered_on: parse_date("registeredAt", &dto.registered_at)?,
            deleted_on: parse_optional_date("deletedAt", dto.deleted_at.as_deref())?,
            updated_on: parse_optional_date("updatedAt", dto.updated_at.as_deref())?,
            registered_by: non_blank(dto.registered_by.as_deref())
                .unwrap_or_else(|| DEFAULT_REGISTERED_BY.to_string()),
            deleted_by: non_blank(dto.deleted_by.as_deref()),
            photo_url: non_blank(dto.photo_url.as_deref()),
            name: dto.animal_name,
            species: dto.species,
            breed: dto.breed.unwrap_or_default(),
            server_age: dto.age,
            weight: dto.weight.unwrap_or(0.0),
            customer_id: dto.customer_id,
            owner: dto.customer.map(|owner| OwnerSummary {
                customer_id: owner.customer_id,
                full_name: owner.full_name,
                phone: owner.phone,
                email: owner.email,
            }),
            deleted: dto.is_deleted,
        })
    }
}

impl CreatePatientDto {
    /// Create payload for `draft`; a missing birth date is sent as `today`.
    pub fn from_draft(draft: &PatientDraft, today: NaiveDate) -> Self {
        CreatePatientDto {
            animal_name: draft.name.clone(),
            species: draft.species.clone(),
            breed: draft.breed.clone(),
            gender: draft.gender.as_wire().to_string(),
            birth_date: format_date(draft.birth_date.unwrap_or(today)),
            weight: draft.weight,
            classification: draft.classification.as_wire().to_string(),
            photo_url: non_blank(draft.photo_url.as_deref()),
            customer_id: draft.customer_id,
        }
    }
}

impl UpdatePatientDto {
    /// Update payload for `patient`; a missing birth date is sent as `today`.
    pub fn from_patient(patient: &Patient, today: NaiveDate) -> Self {
        UpdatePatientDto {
            patient_id: patient.id,
            fields: CreatePatientDto {
                animal_name: patient.name.clone(),
                species: patient.species.clone(),
                breed: patient.breed.clone(),
                gender: patient.gender.as_wire().to_string(),
                birth_date: format_date(patient.birth_date.unwrap_or(today)),
                weight: patient.weight,
                classification: patient.classification.as_wire().to_string(),
                photo_url: patient.photo_url.clone(),
                customer_id: patient.customer_id,
            },
        }
    }
}

/// Decode a patient list response.
///
/// # Errors
/// `Error::Network` for malformed JSON, `Error::Validation` for unknown
/// enumerated values or bad dates.
pub fn decode_patients(json: &str) -> Result<Vec<Patient>> {
    decode_list::<PatientDto, Patient>(json)
}

pub fn decode_patient(json: &str) -> Result<Patient> {
    decode_one::<PatientDto, Patient>(json)
}
