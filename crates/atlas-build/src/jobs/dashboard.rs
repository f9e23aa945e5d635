//! `dashboard_stats`: headline numbers for the landing page.

use atlas_core::{AdmissionRecord, IcuStayRecord, PatientRecord, collections};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Artifact, record_scan};
use crate::Result;
use crate::store::{RecordStore, ScanQuery, scan_records};

/// Admission type counted as an emergency admission.
const EMERGENCY_ADMISSION_TYPE: &str = "EW EMER.";

/// The single `dashboard_stats` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub last_updated: DateTime<Utc>,
    pub stats: DashboardMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_patients: u64,
    pub total_admissions: u64,
    /// In-hospital deaths per 100 admissions, 2 decimals.
    pub mortality_rate: f64,
    pub total_deaths: u64,
    pub total_icu_stays: u64,
    pub total_lab_tests: u64,
    /// Male patients per 100 patients, 1 decimal.
    pub male_percentage: f64,
    /// Emergency admissions per 100 admissions, 1 decimal.
    pub emergency_rate: f64,
    pub total_diagnoses: u64,
    pub total_procedures: u64,
    pub total_prescriptions: u64,
    /// Mean anchor age in years, 1 decimal.
    pub avg_patient_age: f64,
    /// Mean ICU length of stay in days, 1 decimal.
    pub avg_icu_stay: f64,
    /// Mean hospital length of stay in days, 1 decimal.
    pub avg_length_of_stay: f64,
}

/// Running mean.
#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    n: u64,
}

impl Mean {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.n += 1;
    }

    fn value(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum / self.n as f64
        }
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `part` per 100 of `whole`, rounded; 0 when `whole` is 0.
fn percentage(part: u64, whole: u64, decimals: i32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_to(part as f64 * 100.0 / whole as f64, decimals)
}

/// Compute every dashboard metric in one pass per collection.
pub fn compute_metrics<S: RecordStore>(store: &S) -> Result<DashboardMetrics> {
    let mut metrics = DashboardMetrics::default();
    let mut skipped = 0u64;
    let mut scanned = 0u64;

    // Patients
    let mut males = 0u64;
    let mut age = Mean::default();
    let patients = scan_records::<S, PatientRecord, _>(
        store,
        &ScanQuery::for_record::<PatientRecord>(),
        |p| {
            if p.gender.as_deref() == Some("M") {
                males += 1;
            }
            if let Some(years) = p.anchor_age {
                age.add(years);
            }
            Ok(true)
        },
    )?;
    metrics.total_patients = patients.scanned;
    metrics.male_percentage = percentage(males, patients.scanned, 1);
    metrics.avg_patient_age = round_to(age.value(), 1);
    scanned += patients.scanned;
    skipped += patients.invalid;

    // Admissions
    let mut deaths = 0u64;
    let mut emergencies = 0u64;
    let mut stay = Mean::default();
    let admissions = scan_records::<S, AdmissionRecord, _>(
        store,
        &ScanQuery::for_record::<AdmissionRecord>(),
        |a| {
            if a.hospital_expire_flag == Some(true) {
                deaths += 1;
            }
            if a.admission_type.as_deref() == Some(EMERGENCY_ADMISSION_TYPE) {
                emergencies += 1;
            }
            if let Some(days) = a.length_of_stay_days() {
                stay.add(days);
            }
            Ok(true)
        },
    )?;
    metrics.total_admissions = admissions.scanned;
    metrics.total_deaths = deaths;
    metrics.mortality_rate = percentage(deaths, admissions.scanned, 2);
    metrics.emergency_rate = percentage(emergencies, admissions.scanned, 1);
    metrics.avg_length_of_stay = round_to(stay.value(), 1);
    scanned += admissions.scanned;
    skipped += admissions.invalid;

    // ICU stays
    let mut icu = Mean::default();
    let stays = scan_records::<S, IcuStayRecord, _>(
        store,
        &ScanQuery::for_record::<IcuStayRecord>(),
        |s| {
            if let Some(los) = s.los.filter(|d| *d >= 0.0) {
                icu.add(los);
            }
            Ok(true)
        },
    )?;
    metrics.total_icu_stays = stays.scanned;
    metrics.avg_icu_stay = round_to(icu.value(), 1);
    scanned += stays.scanned;
    skipped += stays.invalid;

    // Plain counts
    metrics.total_lab_tests = store.count(&ScanQuery::collection(collections::LAB_EVENTS))?;
    metrics.total_diagnoses = store.count(&ScanQuery::collection(collections::DIAGNOSES))?;
    metrics.total_procedures = store.count(&ScanQuery::collection(collections::PROCEDURES))?;
    metrics.total_prescriptions =
        store.count(&ScanQuery::collection(collections::PRESCRIPTIONS))?;

    record_scan(Artifact::DashboardStats, scanned, skipped);
    Ok(metrics)
}

/// Artifact documents: a single `{last_updated, stats}` object, or none when
/// there are no patients and no admissions.
pub fn build_stats<S: RecordStore>(store: &S) -> Result<Vec<DashboardStats>> {
    let stats = compute_metrics(store)?;
    tracing::info!(
        patients = stats.total_patients,
        admissions = stats.total_admissions,
        mortality_rate = stats.mortality_rate,
        "dashboard metrics computed"
    );

    if stats.total_patients == 0 && stats.total_admissions == 0 {
        return Ok(Vec::new());
    }
    Ok(vec![DashboardStats {
        last_updated: Utc::now(),
        stats,
    }])
}
