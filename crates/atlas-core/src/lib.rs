//! Core types and shared utilities for the clinical atlas build pipeline.
//!
//! This crate provides:
//! - Typed schemas for the raw clinical record streams (schema-on-ingest)
//! - Node and category labels shared by the builders and the API
//! - Prometheus metrics helpers
//! - Shared error types

mod de;
mod error;
pub mod labels;
pub mod metrics;
mod record;

// ═══════════════════════════════════════════════════════════════════════════
// Raw collections
// ═══════════════════════════════════════════════════════════════════════════

/// Names of the raw record collections in the snapshot.
pub mod collections {
    pub const ADMISSIONS: &str = "hosp_admissions";
    pub const PATIENTS: &str = "hosp_patients";
    pub const TRANSFERS: &str = "hosp_transfers";
    pub const DIAGNOSES: &str = "hosp_diagnoses_icd";
    pub const PROCEDURES: &str = "hosp_procedures_icd";
    pub const PRESCRIPTIONS: &str = "hosp_prescriptions";
    pub const LAB_EVENTS: &str = "hosp_labevents";
    pub const ICU_STAYS: &str = "icu_icustays";
    /// ICD code → chapter / super-section / section lookup table.
    pub const ICD_CATEGORIES: &str = "icd_equivalencias";
}

pub use de::{normalize_id, normalize_timestamp};
pub use error::{Error, Result};
pub use record::{
    AdmissionRecord, DiagnosisRecord, IcdCategory, IcuStayRecord, PatientRecord,
    PrescriptionRecord, RawRecord, TransferEvent, TransferKind, from_document,
};
