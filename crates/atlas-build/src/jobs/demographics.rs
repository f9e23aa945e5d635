//! `admission_heatmap`, `age_distribution` and `age_distribution_detailed`.

use atlas_core::{AdmissionRecord, PatientRecord};
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use super::{Artifact, record_scan};
use crate::Result;
use crate::aggregate::count_by;
use crate::store::{Filter, RecordStore, ScanQuery};

// ═══════════════════════════════════════════════════════════════════════════
// Admission heat-map
// ═══════════════════════════════════════════════════════════════════════════

/// Admissions starting in one hour of one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatmapCell {
    /// Hour of day, 0-23.
    pub hour: u32,
    /// Day of week, 1 = Sunday ... 7 = Saturday.
    pub day_of_week: u32,
    pub count: u64,
}

/// Count admissions by weekday and hour of `admittime`.
///
/// Cells are ordered by day, then hour; empty cells are omitted.
pub fn build_admission_heatmap<S: RecordStore>(store: &S) -> Result<Vec<HeatmapCell>> {
    let query = ScanQuery::for_record::<AdmissionRecord>().project(&["admittime"]);
    let (table, stats) = count_by::<S, AdmissionRecord, _, _>(store, &query, |a| {
        a.admittime
            .map(|t| (t.weekday().number_from_sunday(), t.hour()))
    })?;

    record_scan(
        Artifact::AdmissionHeatmap,
        stats.scan.scanned,
        stats.scan.invalid + stats.filtered,
    );
    tracing::info!(
        admissions = stats.counted,
        without_time = stats.filtered,
        "admission times counted"
    );

    let mut cells: Vec<HeatmapCell> = table
        .into_entries()
        .into_iter()
        .map(|((day_of_week, hour), count)| HeatmapCell {
            hour,
            day_of_week,
            count,
        })
        .collect();
    cells.sort_by_key(|c| (c.day_of_week, c.hour));
    Ok(cells)
}

// ═══════════════════════════════════════════════════════════════════════════
// Age distribution
// ═══════════════════════════════════════════════════════════════════════════

/// Lower bounds of the age buckets; the last value is the exclusive upper
/// bound of the final bucket.
const AGE_BOUNDARIES: [f64; 7] = [0.0, 18.0, 30.0, 50.0, 65.0, 80.0, 100.0];

const AGE_LABELS: [&str; 6] = ["0-18", "18-30", "30-50", "50-65", "65-80", "80+"];

/// Genders kept in the distribution.
const GENDERS: [&str; 2] = ["M", "F"];

/// Patients of one gender in one age bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeGroupCount {
    pub age_group: String,
    pub gender: String,
    pub count: u64,
}

/// Index of the bucket an age falls in, if any.
pub fn age_bucket(age: f64) -> Option<usize> {
    AGE_BOUNDARIES
        .windows(2)
        .position(|w| age >= w[0] && age < w[1])
}

/// Count patients by age bucket and gender.
///
/// Ages outside `[0, 100)` and genders other than M/F are left out. Rows are
/// ordered by bucket, then gender.
pub fn build_age_distribution<S: RecordStore>(store: &S) -> Result<Vec<AgeGroupCount>> {
    let query = ScanQuery::for_record::<PatientRecord>().filter(Filter::one_of("gender", GENDERS));
    let (table, stats) = count_by::<S, PatientRecord, _, _>(store, &query, |p| {
        let bucket = age_bucket(p.anchor_age?)?;
        let gender = p.gender.clone()?;
        Some((bucket, gender))
    })?;

    record_scan(
        Artifact::AgeDistribution,
        stats.scan.scanned,
        stats.scan.invalid + stats.filtered,
    );
    tracing::info!(
        patients = stats.counted,
        out_of_range = stats.filtered,
        "patient ages counted"
    );

    let mut rows = table.into_entries();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(rows
        .into_iter()
        .map(|((bucket, gender), count)| AgeGroupCount {
            age_group: AGE_LABELS[bucket].to_string(),
            gender,
            count,
        })
        .collect())
}

/// Youngest and oldest age kept in the per-year distribution.
const DETAILED_AGE_RANGE: (f64, f64) = (18.0, 90.0);

/// Count patients by exact age and gender.
///
/// Only adults up to 90 (the exports cap older ages there) are kept.
/// `age_group` holds the age itself, and rows are ordered by age, then gender.
pub fn build_detailed_age_distribution<S: RecordStore>(store: &S) -> Result<Vec<AgeGroupCount>> {
    let query = ScanQuery::for_record::<PatientRecord>().filter(Filter::one_of("gender", GENDERS));
    let (min_age, max_age) = DETAILED_AGE_RANGE;
    let (table, stats) = count_by::<S, PatientRecord, _, _>(store, &query, |p| {
        let age = p.anchor_age.filter(|age| (min_age..=max_age).contains(age))?;
        Some((age.to_bits(), p.gender.clone()?))
    })?;

    record_scan(
        Artifact::AgeDistributionDetailed,
        stats.scan.scanned,
        stats.scan.invalid + stats.filtered,
    );
    tracing::info!(
        patients = stats.counted,
        out_of_range = stats.filtered,
        "patient ages counted per year"
    );

    let mut rows: Vec<(f64, String, u64)> = table
        .into_entries()
        .into_iter()
        .map(|((bits, gender), count)| (f64::from_bits(bits), gender, count))
        .collect();
    rows.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(rows
        .into_iter()
        .map(|(age, gender, count)| AgeGroupCount {
            age_group: age.to_string(),
            gender,
            count,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_age_buckets() {
        assert_eq!(age_bucket(0.0), Some(0));
        assert_eq!(age_bucket(17.9), Some(0));
        assert_eq!(age_bucket(18.0), Some(1));
        assert_eq!(age_bucket(64.0), Some(3));
        assert_eq!(age_bucket(91.0), Some(5));
        assert_eq!(age_bucket(100.0), None);
        assert_eq!(age_bucket(-1.0), None);
    }

    #[test]
    fn test_age_distribution() {
        let store = MemoryStore::new();
        store
            .insert_json(
                "hosp_patients",
                vec![
                    json!({"subject_id": 1, "gender": "M", "anchor_age": 45}),
                    json!({"subject_id": 2, "gender": "F", "anchor_age": 45}),
                    json!({"subject_id": 3, "gender": "F", "anchor_age": 33}),
                    json!({"subject_id": 4, "gender": "F", "anchor_age": 17}),
                    json!({"subject_id": 5, "gender": "X", "anchor_age": 40}),
                    json!({"subject_id": 6, "gender": "M", "anchor_age": 120}),
                    json!({"subject_id": 7, "gender": "M"}),
                    json!({"subject_id": 8, "gender": "M", "anchor_age": 85}),
                ],
            )
            .unwrap();

        let rows = build_age_distribution(&store).unwrap();
        let flat: Vec<(&str, &str, u64)> = rows
            .iter()
            .map(|r| (r.age_group.as_str(), r.gender.as_str(), r.count))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("0-18", "F", 1),
                ("30-50", "F", 2),
                ("30-50", "M", 1),
                ("80+", "M", 1),
            ]
        );
    }

    #[test]
    fn test_detailed_age_distribution() {
        let store = MemoryStore::new();
        store
            .insert_json(
                "hosp_patients",
                vec![
                    json!({"subject_id": 1, "gender": "M", "anchor_age": 45}),
                    json!({"subject_id": 2, "gender": "F", "anchor_age": 45}),
                    json!({"subject_id": 3, "gender": "F", "anchor_age": "45"}),
                    json!({"subject_id": 4, "gender": "M", "anchor_age": 9}),
                    json!({"subject_id": 5, "gender": "F", "anchor_age": 18}),
                    json!({"subject_id": 6, "gender": "M", "anchor_age": 90}),
                    json!({"subject_id": 7, "gender": "M", "anchor_age": 91}),
                    json!({"subject_id": 8, "gender": "X", "anchor_age": 50}),
                ],
            )
            .unwrap();

        let rows = build_detailed_age_distribution(&store).unwrap();
        let flat: Vec<(&str, &str, u64)> = rows
            .iter()
            .map(|r| (r.age_group.as_str(), r.gender.as_str(), r.count))
            .collect();
        assert_eq!(
            flat,
            vec![("18", "F", 1), ("45", "F", 2), ("45", "M", 1), ("90", "M", 1)]
        );
    }

    #[test]
    fn test_admission_heatmap() {
        let store = MemoryStore::new();
        // 2024-01-07 is a Sunday.
        store
            .insert_json(
                "hosp_admissions",
                vec![
                    json!({"hadm_id": 1, "admittime": "2024-01-07 14:05:00"}),
                    json!({"hadm_id": 2, "admittime": "2024-01-07 14:55:00"}),
                    json!({"hadm_id": 3, "admittime": "2024-01-08 03:00:00"}),
                    json!({"hadm_id": 4, "admittime": "2024-01-13 23:59:00"}),
                    json!({"hadm_id": 5}),
                ],
            )
            .unwrap();

        let cells = build_admission_heatmap(&store).unwrap();
        assert_eq!(
            cells,
            vec![
                HeatmapCell { hour: 14, day_of_week: 1, count: 2 },
                HeatmapCell { hour: 3, day_of_week: 2, count: 1 },
                HeatmapCell { hour: 23, day_of_week: 7, count: 1 },
            ]
        );
    }
}
