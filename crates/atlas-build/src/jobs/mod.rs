//! Artifact build jobs.
//!
//! Each [`Artifact`] names one precomputed result and knows how to build it
//! from the raw collections. [`run`] wraps a job in the orchestrator's
//! one-shot guard (or a forced rebuild).
//!
//! # Artifacts
//!
//! | Name                           | Built from                          |
//! |--------------------------------|-------------------------------------|
//! | `transfer_edges_chord`         | `hosp_transfers`                    |
//! | `prescription_counts_by_route` | `hosp_prescriptions`                |
//! | `diag_counts_by_code`          | `hosp_diagnoses_icd`                |
//! | `diagnosis_hierarchy`          | `diag_counts_by_code` + ICD lookup  |
//! | `admission_heatmap`            | `hosp_admissions`                   |
//! | `age_distribution`             | `hosp_patients`                     |
//! | `age_distribution_detailed`    | `hosp_patients`                     |
//! | `icu_stay_duration`            | `icu_icustays`                      |
//! | `dashboard_stats`              | several collections                 |

pub mod dashboard;
pub mod demographics;
pub mod diagnoses;
pub mod icu;
pub mod prescriptions;
pub mod transfers;

use std::fmt;
use std::str::FromStr;

use crate::aggregate::GapPolicy;
use crate::orchestrator::{self, BuildOutcome};
use crate::store::{ArtifactStore, LookupTable, RecordStore};
use crate::{Error, Result};

/// Default leaf threshold for the persisted diagnosis hierarchy.
pub const DEFAULT_MIN_COUNT: u64 = 50;

/// A named precomputed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    TransferEdges,
    PrescriptionCounts,
    DiagnosisCounts,
    DiagnosisHierarchy,
    AdmissionHeatmap,
    AgeDistribution,
    AgeDistributionDetailed,
    IcuStayDuration,
    DashboardStats,
}

impl Artifact {
    /// Every artifact, in dependency order.
    pub const ALL: [Artifact; 9] = [
        Artifact::TransferEdges,
        Artifact::PrescriptionCounts,
        Artifact::DiagnosisCounts,
        Artifact::DiagnosisHierarchy,
        Artifact::AdmissionHeatmap,
        Artifact::AgeDistribution,
        Artifact::AgeDistributionDetailed,
        Artifact::IcuStayDuration,
        Artifact::DashboardStats,
    ];

    /// Storage name of the artifact.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TransferEdges => "transfer_edges_chord",
            Self::PrescriptionCounts => "prescription_counts_by_route",
            Self::DiagnosisCounts => "diag_counts_by_code",
            Self::DiagnosisHierarchy => "diagnosis_hierarchy",
            Self::AdmissionHeatmap => "admission_heatmap",
            Self::AgeDistribution => "age_distribution",
            Self::AgeDistributionDetailed => "age_distribution_detailed",
            Self::IcuStayDuration => "icu_stay_duration",
            Self::DashboardStats => "dashboard_stats",
        }
    }

    /// Artifacts that must exist before this one can be built.
    pub fn dependencies(&self) -> &'static [Artifact] {
        match self {
            Self::DiagnosisHierarchy => &[Artifact::DiagnosisCounts],
            _ => &[],
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Artifact {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|a| a.name() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|a| a.name()).collect();
                format!("unknown artifact '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Options shared by all jobs.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Replace artifacts even when they already hold documents.
    pub force: bool,
    /// Leaf threshold for the diagnosis hierarchy.
    pub min_count: u64,
    pub gap_policy: GapPolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            force: false,
            min_count: DEFAULT_MIN_COUNT,
            gap_policy: GapPolicy::default(),
        }
    }
}

/// Build one artifact through the orchestrator.
pub fn run<S>(store: &S, artifact: Artifact, options: &JobOptions) -> Result<BuildOutcome>
where
    S: RecordStore + ArtifactStore + LookupTable,
{
    for dependency in artifact.dependencies() {
        if store.artifact_size(dependency.name())? == 0 {
            return Err(Error::MissingArtifact(format!(
                "{} requires {}; build it first",
                artifact, dependency
            )));
        }
    }

    let name = artifact.name();
    match artifact {
        Artifact::TransferEdges => guarded(store, name, options, || transfers::build_edges(store)),
        Artifact::PrescriptionCounts => guarded(store, name, options, || {
            prescriptions::build_route_counts(store)
        }),
        Artifact::DiagnosisCounts => {
            guarded(store, name, options, || diagnoses::build_code_counts(store))
        }
        Artifact::DiagnosisHierarchy => guarded(store, name, options, || {
            diagnoses::build_persisted_hierarchy(store, options.min_count, options.gap_policy)
        }),
        Artifact::AdmissionHeatmap => guarded(store, name, options, || {
            demographics::build_admission_heatmap(store)
        }),
        Artifact::AgeDistribution => guarded(store, name, options, || {
            demographics::build_age_distribution(store)
        }),
        Artifact::AgeDistributionDetailed => guarded(store, name, options, || {
            demographics::build_detailed_age_distribution(store)
        }),
        Artifact::IcuStayDuration => {
            guarded(store, name, options, || icu::build_stay_durations(store))
        }
        Artifact::DashboardStats => {
            guarded(store, name, options, || dashboard::build_stats(store))
        }
    }
}

/// Build every artifact in dependency order.
///
/// Stops at the first failing job; artifacts built before it are kept.
pub fn run_all<S>(store: &S, options: &JobOptions) -> Result<Vec<(Artifact, BuildOutcome)>>
where
    S: RecordStore + ArtifactStore + LookupTable,
{
    let mut outcomes = Vec::with_capacity(Artifact::ALL.len());
    for artifact in Artifact::ALL {
        let outcome = run(store, artifact, options)?;
        outcomes.push((artifact, outcome));
    }
    Ok(outcomes)
}

fn guarded<S, T, F>(store: &S, name: &str, options: &JobOptions, builder: F) -> Result<BuildOutcome>
where
    S: ArtifactStore,
    T: serde::Serialize,
    F: FnOnce() -> Result<Vec<T>>,
{
    if options.force {
        orchestrator::rebuild(store, name, builder)
    } else {
        orchestrator::build_if_absent(store, name, builder)
    }
}

/// Emit the per-artifact scan counters.
pub(crate) fn record_scan(artifact: Artifact, scanned: u64, skipped: u64) {
    atlas_core::metrics::increment_for("build_records_scanned_total", artifact.name(), scanned);
    atlas_core::metrics::increment_for("build_records_skipped_total", artifact.name(), skipped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, read_artifact_as};
    use serde_json::{Value, json};

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_json(
                "hosp_transfers",
                vec![
                    json!({"hadm_id": 1, "eventtype": "admit", "careunit": "Medicine", "intime": "2180-01-01 08:00:00"}),
                    json!({"hadm_id": 1, "eventtype": "discharge", "intime": "2180-01-03 08:00:00"}),
                ],
            )
            .unwrap();
        store
            .insert_json(
                "hosp_prescriptions",
                vec![json!({"route": "PO", "drug": "Aspirin"})],
            )
            .unwrap();
        store
            .insert_json(
                "hosp_diagnoses_icd",
                vec![json!({"icd_code": "A01"}), json!({"icd_code": "A01"})],
            )
            .unwrap();
        store
            .insert_json(
                "icd_equivalencias",
                vec![json!({"icd_code": "A01", "chapter_name": "Infections"})],
            )
            .unwrap();
        store
            .insert_json(
                "hosp_admissions",
                vec![json!({"hadm_id": 1, "admittime": "2180-01-01 08:00:00", "dischtime": "2180-01-03 08:00:00", "admission_type": "EW EMER.", "hospital_expire_flag": 0})],
            )
            .unwrap();
        store
            .insert_json(
                "hosp_patients",
                vec![json!({"subject_id": 10, "gender": "F", "anchor_age": 52})],
            )
            .unwrap();
        store
            .insert_json(
                "icu_icustays",
                vec![json!({"stay_id": 100, "hadm_id": 1, "first_careunit": "MICU", "los": 1.5})],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_artifact_names_roundtrip() {
        for artifact in Artifact::ALL {
            assert_eq!(artifact.name().parse::<Artifact>().unwrap(), artifact);
        }
        assert_eq!(
            "transfer-edges-chord".parse::<Artifact>().unwrap(),
            Artifact::TransferEdges
        );
        assert!("nope".parse::<Artifact>().is_err());
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        for (i, artifact) in Artifact::ALL.iter().enumerate() {
            for dependency in artifact.dependencies() {
                let position = Artifact::ALL.iter().position(|a| a == dependency).unwrap();
                assert!(position < i);
            }
        }
    }

    #[test]
    fn test_hierarchy_requires_counts() {
        let store = seeded_store();
        let err = run(&store, Artifact::DiagnosisHierarchy, &JobOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingArtifact(_)));
    }

    #[test]
    fn test_run_all_builds_everything() {
        let store = seeded_store();
        let options = JobOptions {
            min_count: 1,
            ..Default::default()
        };

        let outcomes = run_all(&store, &options).unwrap();
        assert_eq!(outcomes.len(), Artifact::ALL.len());
        for (artifact, outcome) in &outcomes {
            assert!(outcome.is_built(), "{} was not built: {:?}", artifact, outcome);
        }

        let again = run_all(&store, &options).unwrap();
        assert!(
            again
                .iter()
                .all(|(_, o)| matches!(o, BuildOutcome::AlreadyPresent { .. }))
        );

        let edges: Vec<Value> = read_artifact_as(&store, "transfer_edges_chord").unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn test_force_rebuilds() {
        let store = seeded_store();
        run(&store, Artifact::AgeDistribution, &JobOptions::default()).unwrap();
        let forced = JobOptions {
            force: true,
            ..Default::default()
        };
        let outcome = run(&store, Artifact::AgeDistribution, &forced).unwrap();
        assert!(outcome.is_built());
    }
}
