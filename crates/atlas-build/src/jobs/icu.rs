//! `icu_stay_duration`: ICU length of stay per first care unit.

use std::collections::HashMap;

use atlas_core::IcuStayRecord;
use serde::{Deserialize, Serialize};

use super::dashboard::round_to;
use super::{Artifact, record_scan};
use crate::Result;
use crate::store::{RecordStore, ScanQuery, scan_records};

/// Length-of-stay summary for one care unit, in days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareUnitStay {
    pub careunit: String,
    /// Mean length of stay, 2 decimals.
    pub avg_stay_days: f64,
    pub total_stays: u64,
    pub min_stay: f64,
    pub max_stay: f64,
}

#[derive(Debug, Clone, Copy)]
struct StayRange {
    sum: f64,
    n: u64,
    min: f64,
    max: f64,
}

impl StayRange {
    fn new(los: f64) -> Self {
        Self {
            sum: los,
            n: 1,
            min: los,
            max: los,
        }
    }

    fn add(&mut self, los: f64) {
        self.sum += los;
        self.n += 1;
        self.min = self.min.min(los);
        self.max = self.max.max(los);
    }
}

/// Summarize ICU stays by `first_careunit`.
///
/// Stays without a care unit or with a missing or negative `los` are left
/// out. Units are ordered by mean stay, longest first.
pub fn build_stay_durations<S: RecordStore>(store: &S) -> Result<Vec<CareUnitStay>> {
    let query = ScanQuery::for_record::<IcuStayRecord>().project(&["first_careunit", "los"]);
    let mut units: HashMap<String, StayRange> = HashMap::new();
    let mut filtered = 0u64;

    let scan = scan_records::<S, IcuStayRecord, _>(store, &query, |stay| {
        match (stay.first_careunit, stay.los) {
            (Some(unit), Some(los)) if los >= 0.0 => {
                units
                    .entry(unit)
                    .and_modify(|range| range.add(los))
                    .or_insert_with(|| StayRange::new(los));
            }
            _ => filtered += 1,
        }
        Ok(true)
    })?;

    record_scan(Artifact::IcuStayDuration, scan.scanned, scan.invalid + filtered);
    tracing::info!(
        stays = scan.valid - filtered,
        skipped = filtered,
        units = units.len(),
        "ICU stays summarized"
    );

    let mut rows: Vec<CareUnitStay> = units
        .into_iter()
        .map(|(careunit, range)| CareUnitStay {
            careunit,
            avg_stay_days: round_to(range.sum / range.n as f64, 2),
            total_stays: range.n,
            min_stay: round_to(range.min, 2),
            max_stay: round_to(range.max, 2),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.avg_stay_days
            .total_cmp(&a.avg_stay_days)
            .then_with(|| a.careunit.cmp(&b.careunit))
    });
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_stay_durations_by_unit() {
        let store = MemoryStore::new();
        store
            .insert_json(
                "icu_icustays",
                vec![
                    json!({"stay_id": 1, "first_careunit": "MICU", "los": 2.0}),
                    json!({"stay_id": 2, "first_careunit": "MICU", "los": "4.34"}),
                    json!({"stay_id": 3, "first_careunit": "CVICU", "los": 7.126}),
                    json!({"stay_id": 4, "first_careunit": "CVICU", "los": -1.0}),
                    json!({"stay_id": 5, "first_careunit": "", "los": 3.0}),
                    json!({"stay_id": 6, "first_careunit": "SICU"}),
                    json!({"stay_id": 7, "los": 1.0}),
                ],
            )
            .unwrap();

        let rows = build_stay_durations(&store).unwrap();
        assert_eq!(
            rows,
            vec![
                CareUnitStay {
                    careunit: "CVICU".to_string(),
                    avg_stay_days: 7.13,
                    total_stays: 1,
                    min_stay: 7.13,
                    max_stay: 7.13,
                },
                CareUnitStay {
                    careunit: "MICU".to_string(),
                    avg_stay_days: 3.17,
                    total_stays: 2,
                    min_stay: 2.0,
                    max_stay: 4.34,
                },
            ]
        );
    }

    #[test]
    fn test_no_stays_gives_no_rows() {
        let store = MemoryStore::new();
        assert!(build_stay_durations(&store).unwrap().is_empty());
    }
}
