//! `prescription_counts_by_route`: drug counts nested under route.

use atlas_core::{PrescriptionRecord, labels};
use serde::{Deserialize, Serialize};

use super::{Artifact, record_scan};
use crate::Result;
use crate::aggregate::{count_by, nest};
use crate::store::{RecordStore, ScanQuery};

/// Prescriptions of one drug under a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugCount {
    pub drug: String,
    pub count: u64,
}

/// One route with its total and per-drug counts (count descending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDrugCounts {
    pub route: String,
    pub total: u64,
    pub drugs: Vec<DrugCount>,
}

/// Count prescriptions by `(route, drug)` and regroup by route.
///
/// Missing routes or drugs are counted under "Unknown".
pub fn build_route_counts<S: RecordStore>(store: &S) -> Result<Vec<RouteDrugCounts>> {
    let query = ScanQuery::for_record::<PrescriptionRecord>();
    let (table, stats) = count_by::<S, PrescriptionRecord, _, _>(store, &query, |p| {
        Some((
            labels::or_unknown(p.route.as_deref()),
            labels::or_unknown(p.drug.as_deref()),
        ))
    })?;

    record_scan(
        Artifact::PrescriptionCounts,
        stats.scan.scanned,
        stats.scan.invalid + stats.filtered,
    );
    tracing::info!(
        prescriptions = stats.counted,
        pairs = table.len(),
        invalid = stats.scan.invalid,
        "prescriptions counted"
    );

    Ok(nest(table)
        .into_iter()
        .map(|group| RouteDrugCounts {
            route: group.key,
            total: group.total,
            drugs: group
                .items
                .into_iter()
                .map(|(drug, count)| DrugCount { drug, count })
                .collect(),
        })
        .collect())
}
