//! `diag_counts_by_code` and `diagnosis_hierarchy`.
//!
//! The per-code counts are the expensive scan over every diagnosis row. The
//! hierarchy is then folded from those counts, so it can also be recomputed
//! cheaply for other thresholds.

use atlas_core::DiagnosisRecord;
use serde::{Deserialize, Serialize};

use super::{Artifact, record_scan};
use crate::Result;
use crate::aggregate::{
    CategoryNode, GapPolicy, HierarchyOptions, HierarchyStats, build_hierarchy, count_by,
};
use crate::store::{ArtifactStore, LookupTable, RecordStore, ScanQuery, read_artifact_as};

/// Number of diagnosis rows carrying one ICD code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCount {
    pub icd_code: String,
    pub count: u64,
}

/// Count diagnoses per ICD code, most frequent first.
///
/// Rows without a non-empty textual code are filtered out.
pub fn build_code_counts<S: RecordStore>(store: &S) -> Result<Vec<CodeCount>> {
    let query = ScanQuery::for_record::<DiagnosisRecord>().project(&["icd_code"]);
    let (table, stats) =
        count_by::<S, DiagnosisRecord, _, _>(store, &query, |d| d.icd_code.clone())?;

    record_scan(
        Artifact::DiagnosisCounts,
        stats.scan.scanned,
        stats.scan.invalid + stats.filtered,
    );
    tracing::info!(
        diagnoses = stats.counted,
        codes = table.len(),
        without_code = stats.filtered,
        invalid = stats.scan.invalid,
        "diagnoses counted"
    );

    Ok(table
        .into_sorted()
        .into_iter()
        .map(|(icd_code, count)| CodeCount { icd_code, count })
        .collect())
}

/// Fold code counts into a category hierarchy.
pub fn hierarchy_from_counts<L>(
    counts: &[CodeCount],
    lookup: &L,
    min_count: u64,
    gap_policy: GapPolicy,
) -> Result<(CategoryNode, HierarchyStats)>
where
    L: LookupTable + ?Sized,
{
    let options = HierarchyOptions {
        min_count,
        gap_policy,
        ..Default::default()
    };
    build_hierarchy(
        counts.iter().map(|c| (c.icd_code.as_str(), c.count)),
        lookup,
        options,
    )
}

/// Build the hierarchy artifact from the stored code counts.
///
/// Returns a single document, or none when no chapter survives the
/// threshold.
pub fn build_persisted_hierarchy<S>(
    store: &S,
    min_count: u64,
    gap_policy: GapPolicy,
) -> Result<Vec<CategoryNode>>
where
    S: ArtifactStore + LookupTable,
{
    let counts: Vec<CodeCount> = read_artifact_as(store, Artifact::DiagnosisCounts.name())?;
    let (root, stats) = hierarchy_from_counts(&counts, store, min_count, gap_policy)?;

    record_scan(Artifact::DiagnosisHierarchy, stats.rows, stats.dropped());

    if root.children.is_empty() {
        tracing::warn!(min_count, "No diagnosis chapter reached the threshold");
        return Ok(Vec::new());
    }
    Ok(vec![root])
}
