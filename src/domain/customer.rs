//! Clinic customers (pet and livestock owners).

use super::{
    decode_list, decode_one, format_date, non_blank, parse_date, unknown_value, Validator,
};
use crate::entity::{Resource, ResourceDraft, UniqueField};
use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CustomerType {
    Domestic,
    Farm,
}

impl CustomerType {
    pub const ALL: [CustomerType; 2] = [CustomerType::Domestic, CustomerType::Farm];

    pub fn as_wire(&self) -> &'static str {
        match self {
            CustomerType::Domestic => "Domestic",
            CustomerType::Farm => "Farm",
        }
    }

    /// Display label used by the clinic staff.
    pub fn label(&self) -> &'static str {
        match self {
            CustomerType::Domestic => "Doméstico",
            CustomerType::Farm => "Granja",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.label() == label)
            .ok_or_else(|| unknown_value("customerType", label))
    }
}

impl FromStr for CustomerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_wire() == s)
            .ok_or_else(|| unknown_value("customerType", s))
    }
}

impl fmt::Display for CustomerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CustomerStatus {
    Active,
    Inactive,
    Overdue,
    InDebt,
    Vip,
}

impl CustomerStatus {
    pub const ALL: [CustomerStatus; 5] = [
        CustomerStatus::Active,
        CustomerStatus::Inactive,
        CustomerStatus::Overdue,
        CustomerStatus::InDebt,
        CustomerStatus::Vip,
    ];

    pub fn as_wire(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "Active",
            CustomerStatus::Inactive => "Inactive",
            CustomerStatus::Overdue => "Overdue",
            CustomerStatus::InDebt => "InDebt",
            CustomerStatus::Vip => "VIP",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "Activo",
            CustomerStatus::Inactive => "Inactivo",
            CustomerStatus::Overdue => "Moroso",
            CustomerStatus::InDebt => "En Deuda",
            CustomerStatus::Vip => "VIP",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.label() == label)
            .ok_or_else(|| unknown_value("customerStatus", label))
    }
}

impl FromStr for CustomerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_wire() == s)
            .ok_or_else(|| unknown_value("customerStatus", s))
    }
}

impl fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A customer as cached by the front office.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Customer {
    pub id: u64,
    pub first_names: String,
    pub paternal_last_name: String,
    pub maternal_last_name: Option<String>,
    pub document_id: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub customer_type: CustomerType,
    pub status: CustomerStatus,
    pub notes: String,
    pub registered_on: NaiveDate,
}

impl Customer {
    /// First names and last names; the maternal name only when present.
    pub fn full_name(&self) -> String {
        full_name(
            &self.first_names,
            &self.paternal_last_name,
            self.maternal_last_name.as_deref(),
        )
    }
}

fn full_name(first_names: &str, paternal: &str, maternal: Option<&str>) -> String {
    let mut parts = vec![first_names, paternal];
    if let Some(maternal) = maternal.filter(|m| !m.trim().is_empty()) {
        parts.push(maternal);
    }
    parts.join(" ")
}

/// Payload of a new customer, before the server assigns an id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerDraft {
    pub first_names: String,
    pub paternal_last_name: String,
    pub maternal_last_name: Option<String>,
    pub document_id: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub customer_type: CustomerType,
    pub status: CustomerStatus,
    pub notes: String,
}

fn looks_like_email(value: &str) -> bool {
    let value = value.trim();
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn validate_contact(
    first_names: &str,
    paternal_last_name: &str,
    document_id: &str,
    phone: &str,
    email: &str,
) -> Result<()> {
    let mut validator = Validator::new()
        .required("firstNames", first_names)
        .required("paternalLastName", paternal_last_name)
        .required("documentId", document_id)
        .required("phone", phone)
        .required("email", email);
    if !email.trim().is_empty() {
        validator = validator.check(looks_like_email(email), "email", "email format is invalid");
    }
    validator.finish()
}

fn contact_unique_fields(document_id: &str, email: &str) -> Vec<UniqueField> {
    vec![
        UniqueField::new("documentId", document_id),
        UniqueField::case_insensitive("email", email),
    ]
}

impl Resource for Customer {
    type Key = u64;
    type Draft = CustomerDraft;

    fn resource_key(&self) -> Self::Key {
        self.id
    }

    fn resource_kind() -> &'static str {
        "customer"
    }

    fn validate(&self) -> Result<()> {
        validate_contact(
            &self.first_names,
            &self.paternal_last_name,
            &self.document_id,
            &self.phone,
            &self.email,
        )
    }

    fn unique_fields(&self) -> Vec<UniqueField> {
        contact_unique_fields(&self.document_id, &self.email)
    }
}

impl ResourceDraft for CustomerDraft {
    fn validate(&self) -> Result<()> {
        validate_contact(
            &self.first_names,
            &self.paternal_last_name,
            &self.document_id,
            &self.phone,
            &self.email,
        )
    }

    fn unique_fields(&self) -> Vec<UniqueField> {
        contact_unique_fields(&self.document_id, &self.email)
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// Customer as sent and received by the API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDto {
    pub customer_id: u64,
    pub first_names: String,
    pub paternal_last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maternal_last_name: Option<String>,
    pub document_id: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub customer_type: String,
    #[serde(default)]
    pub notes: String,
    pub customer_status: String,
    #[serde(default)]
    pub full_name: String,
    pub created_at: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default)]
    pub deleted_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Create payload of the API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerDto {
    pub first_names: String,
    pub paternal_last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maternal_last_name: Option<String>,
    pub document_id: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub customer_type: String,
    pub notes: String,
    pub customer_status: String,
}

impl TryFrom<CustomerDto> for Customer {
    type Error = Error;

    fn try_from(dto: CustomerDto) -> Result<Self> {
        Ok(Customer {
            id: dto.customer_id,
            customer_type: dto.customer_type.parse()?,
            status: dto.customer_status.parse()?,
            registered_on: parse_date("createdAt", &dto.created_at)?,
            maternal_last_name: non_blank(dto.maternal_last_name.as_deref()),
            first_names: dto.first_names,
            paternal_last_name: dto.paternal_last_name,
            document_id: dto.document_id,
            phone: dto.phone,
            email: dto.email,
            address: dto.address,
            notes: dto.notes,
        })
    }
}

impl From<&Customer> for CustomerDto {
    fn from(customer: &Customer) -> Self {
        CustomerDto {
            customer_id: customer.id,
            first_names: customer.first_names.clone(),
            paternal_last_name: customer.paternal_last_name.clone(),
            maternal_last_name: non_blank(customer.maternal_last_name.as_deref()),
            document_id: customer.document_id.clone(),
            phone: customer.phone.clone(),
            email: customer.email.clone(),
            address: customer.address.clone(),
            customer_type: customer.customer_type.as_wire().to_string(),
            notes: customer.notes.clone(),
            customer_status: customer.status.as_wire().to_string(),
            full_name: customer.full_name(),
            created_at: format_date(customer.registered_on),
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            updated_at: None,
        }
    }
}

impl From<&CustomerDraft> for CreateCustomerDto {
    fn from(draft: &CustomerDraft) -> Self {
        CreateCustomerDto {
            first_names: draft.first_names.clone(),
            paternal_last_name: draft.paternal_last_name.clone(),
            maternal_last_name: non_blank(draft.maternal_last_name.as_deref()),
            document_id: draft.document_id.clone(),
            phone: draft.phone.clone(),
            email: draft.email.clone(),
            address: draft.address.clone(),
            customer_type: draft.customer_type.as_wire().to_string(),
            notes: draft.notes.clone(),
            customer_status: draft.status.as_wire().to_string(),
        }
    }
}

/// Decode a customer list response.
///
/// # Errors
/// `Error::Network` for malformed JSON, `Error::Validation` for unknown
/// enumerated values or bad dates.
pub fn decode_customers(json: &str) -> Result<Vec<Customer>> {
    decode_list::<CustomerDto, Customer>(json)
}

/// Decode a single customer response.
///
/// # Errors
/// Same as [`decode_customers`].
pub fn decode_customer(json: &str) -> Result<Customer> {
    decode_one::<CustomerDto, Customer>(json)
}
