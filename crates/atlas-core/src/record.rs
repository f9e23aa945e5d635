//! Typed schemas for the raw record streams.
//!
//! Every raw collection is read through one of these structs. Documents are
//! converted once, at the scan boundary, via [`from_document`]; a document
//! that cannot be interpreted is rejected with [`Error::InvalidRecord`] and
//! the caller decides whether to skip it.

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::collections;
use crate::de;
use crate::error::{Error, Result};

/// A typed record belonging to one raw collection.
pub trait RawRecord: DeserializeOwned {
    /// Collection the records are read from.
    const COLLECTION: &'static str;

    /// Fields to project when scanning the collection.
    const FIELDS: &'static [&'static str];
}

/// Convert a raw document into a typed record.
pub fn from_document<R: RawRecord>(document: Map<String, Value>) -> Result<R> {
    serde_json::from_value(Value::Object(document)).map_err(|e| Error::InvalidRecord {
        collection: R::COLLECTION,
        reason: e.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Transfers
// ═══════════════════════════════════════════════════════════════════════════

/// Kind of a transfer event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransferKind {
    /// Admission to a ward.
    Admit,
    /// Move between care units.
    Transfer,
    /// Emergency department contact.
    Ed,
    /// Discharge from hospital.
    Discharge,
    /// Missing or blank event type.
    #[default]
    Unspecified,
    /// Any other event type, kept verbatim.
    Other(String),
}

impl TransferKind {
    /// Parse the source `eventtype` value.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "admit" => Self::Admit,
            "transfer" => Self::Transfer,
            "ED" => Self::Ed,
            "discharge" => Self::Discharge,
            "" => Self::Unspecified,
            other => Self::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for TransferKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(de::opt_str(deserializer)?
            .map(|s| Self::parse(&s))
            .unwrap_or_default())
    }
}

/// One row of `hosp_transfers`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferEvent {
    /// Admission the event belongs to (the pathway entity).
    #[serde(default, deserialize_with = "de::opt_id")]
    pub hadm_id: Option<i64>,
    #[serde(default)]
    pub eventtype: TransferKind,
    #[serde(default, deserialize_with = "de::opt_str")]
    pub careunit: Option<String>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub intime: Option<NaiveDateTime>,
}

impl RawRecord for TransferEvent {
    const COLLECTION: &'static str = collections::TRANSFERS;
    const FIELDS: &'static [&'static str] = &["hadm_id", "eventtype", "careunit", "intime"];
}

// ═══════════════════════════════════════════════════════════════════════════
// Diagnoses
// ═══════════════════════════════════════════════════════════════════════════

/// One row of `hosp_diagnoses_icd`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiagnosisRecord {
    #[serde(default, deserialize_with = "de::opt_id")]
    pub subject_id: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub hadm_id: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_str")]
    pub icd_code: Option<String>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub icd_version: Option<i64>,
}

impl RawRecord for DiagnosisRecord {
    const COLLECTION: &'static str = collections::DIAGNOSES;
    const FIELDS: &'static [&'static str] = &["subject_id", "hadm_id", "icd_code", "icd_version"];
}

/// One row of the ICD category lookup table.
///
/// Only `chapter_name` is mandatory for a code to appear in the hierarchy;
/// the deeper levels are optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IcdCategory {
    #[serde(default, deserialize_with = "de::opt_str")]
    pub icd_code: Option<String>,
    #[serde(default, deserialize_with = "de::opt_str")]
    pub chapter_name: Option<String>,
    #[serde(default, deserialize_with = "de::opt_str")]
    pub super_section_name: Option<String>,
    #[serde(default, deserialize_with = "de::opt_str")]
    pub section_name: Option<String>,
}

impl RawRecord for IcdCategory {
    const COLLECTION: &'static str = collections::ICD_CATEGORIES;
    const FIELDS: &'static [&'static str] = &[
        "icd_code",
        "chapter_name",
        "super_section_name",
        "section_name",
    ];
}

impl IcdCategory {
    /// Category path from chapter downwards, as optional level names.
    pub fn levels(&self) -> [Option<&str>; 3] {
        [
            self.chapter_name.as_deref(),
            self.super_section_name.as_deref(),
            self.section_name.as_deref(),
        ]
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Prescriptions
// ═══════════════════════════════════════════════════════════════════════════

/// One row of `hosp_prescriptions`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PrescriptionRecord {
    #[serde(default, deserialize_with = "de::opt_str")]
    pub route: Option<String>,
    #[serde(default, deserialize_with = "de::opt_str")]
    pub drug: Option<String>,
}

impl RawRecord for PrescriptionRecord {
    const COLLECTION: &'static str = collections::PRESCRIPTIONS;
    const FIELDS: &'static [&'static str] = &["route", "drug"];
}

// ═══════════════════════════════════════════════════════════════════════════
// Admissions, patients and ICU stays
// ═══════════════════════════════════════════════════════════════════════════

/// One row of `hosp_admissions`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdmissionRecord {
    #[serde(default, deserialize_with = "de::opt_id")]
    pub hadm_id: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub subject_id: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub admittime: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "de::opt_timestamp")]
    pub dischtime: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "de::opt_str")]
    pub admission_type: Option<String>,
    #[serde(default, deserialize_with = "de::opt_flag")]
    pub hospital_expire_flag: Option<bool>,
}

impl RawRecord for AdmissionRecord {
    const COLLECTION: &'static str = collections::ADMISSIONS;
    const FIELDS: &'static [&'static str] = &[
        "hadm_id",
        "subject_id",
        "admittime",
        "dischtime",
        "admission_type",
        "hospital_expire_flag",
    ];
}

impl AdmissionRecord {
    /// Hospital length of stay in days, when both ends are known and ordered.
    pub fn length_of_stay_days(&self) -> Option<f64> {
        let (admit, discharge) = (self.admittime?, self.dischtime?);
        let seconds = (discharge - admit).num_seconds();
        (seconds >= 0).then(|| seconds as f64 / 86_400.0)
    }
}

/// One row of `hosp_patients`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatientRecord {
    #[serde(default, deserialize_with = "de::opt_id")]
    pub subject_id: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_str")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "de::opt_f64")]
    pub anchor_age: Option<f64>,
}

impl RawRecord for PatientRecord {
    const COLLECTION: &'static str = collections::PATIENTS;
    const FIELDS: &'static [&'static str] = &["subject_id", "gender", "anchor_age"];
}

/// One row of `icu_icustays`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IcuStayRecord {
    #[serde(default, deserialize_with = "de::opt_id")]
    pub stay_id: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub hadm_id: Option<i64>,
    /// Care unit the stay started in.
    #[serde(default, deserialize_with = "de::opt_str")]
    pub first_careunit: Option<String>,
    /// ICU length of stay in fractional days.
    #[serde(default, deserialize_with = "de::opt_f64")]
    pub los: Option<f64>,
}

impl RawRecord for IcuStayRecord {
    const COLLECTION: &'static str = collections::ICU_STAYS;
    const FIELDS: &'static [&'static str] = &["stay_id", "hadm_id", "first_careunit", "los"];
}
