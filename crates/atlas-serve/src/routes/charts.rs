//! Chart endpoints.
//!
//! Each handler returns the shape its chart component consumes. Responses are
//! cached per endpoint (and per parameter set for the icicle).

use std::collections::BTreeSet;

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use atlas_build::aggregate::{CategoryNode, Edge, GapPolicy};
use atlas_build::jobs::Artifact;
use atlas_build::jobs::demographics::{AgeGroupCount, HeatmapCell};
use atlas_build::jobs::diagnoses::{CodeCount, hierarchy_from_counts};
use atlas_build::jobs::icu::CareUnitStay;
use atlas_build::jobs::prescriptions::RouteDrugCounts;

use super::{load_artifact, with_store};
use crate::cache::get_or_compute;
use crate::error::ApiError;
use crate::state::AppState;

// ═══════════════════════════════════════════════════════════════════════════
// Hospital transfers chord
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordLink {
    pub source: String,
    pub target: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordResponse {
    /// Every endpoint of every link, sorted.
    pub nodes: Vec<String>,
    pub links: Vec<ChordLink>,
}

/// Reshape stored edges for the chord diagram.
pub fn chord_from_edges(edges: Vec<Edge>) -> ChordResponse {
    let nodes: BTreeSet<String> = edges
        .iter()
        .flat_map(|e| [e.from.clone(), e.to.clone()])
        .collect();
    ChordResponse {
        nodes: nodes.into_iter().collect(),
        links: edges
            .into_iter()
            .map(|e| ChordLink {
                source: e.from,
                target: e.to,
                value: e.count,
            })
            .collect(),
    }
}

/// `GET /api/v1/charts/hospital-transfers-chord`
pub async fn hospital_transfers_chord(
    State(state): State<AppState>,
) -> Result<Json<ChordResponse>, ApiError> {
    let result = get_or_compute(&state.cache, "hospital_transfers_chord", || async {
        let edges: Vec<Edge> = load_artifact(&state, Artifact::TransferEdges).await?;
        Ok(chord_from_edges(edges))
    })
    .await?;

    Ok(Json(result))
}

// ═══════════════════════════════════════════════════════════════════════════
// Medications sunburst
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SunburstResponse {
    pub data: Vec<RouteDrugCounts>,
    pub total_routes: usize,
}

/// `GET /api/v1/charts/medications-sunburst`
pub async fn medications_sunburst(
    State(state): State<AppState>,
) -> Result<Json<SunburstResponse>, ApiError> {
    let result = get_or_compute(&state.cache, "medications_sunburst", || async {
        let data: Vec<RouteDrugCounts> =
            load_artifact(&state, Artifact::PrescriptionCounts).await?;
        Ok(SunburstResponse {
            total_routes: data.len(),
            data,
        })
    })
    .await?;

    Ok(Json(result))
}

// ═══════════════════════════════════════════════════════════════════════════
// Diagnosis icicle
// ═══════════════════════════════════════════════════════════════════════════

/// Query parameters for the icicle.
///
/// Both are taken as text so a malformed value gets a JSON 400 body.
#[derive(Debug, Default, Deserialize)]
pub struct IcicleParams {
    /// Leaf threshold; omit to get the persisted hierarchy.
    pub min_count: Option<String>,
    /// `fold` (default) or `placeholder`; requires `min_count`.
    pub gap_policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcicleResponse {
    pub data: CategoryNode,
}

/// `GET /api/v1/charts/diagnosis-icicle[?min_count=N]`
pub async fn diagnosis_icicle(
    State(state): State<AppState>,
    Query(params): Query<IcicleParams>,
) -> Result<Json<IcicleResponse>, ApiError> {
    let min_count = params
        .min_count
        .as_deref()
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| {
                    ApiError::BadRequest(format!(
                        "min_count must be a non-negative integer, got '{}'",
                        raw
                    ))
                })
        })
        .transpose()?;
    let gap_policy = match params.gap_policy.as_deref() {
        Some(raw) => raw.parse::<GapPolicy>().map_err(ApiError::BadRequest)?,
        None => GapPolicy::default(),
    };
    // The persisted hierarchy was folded with the build-time policy.
    if min_count.is_none() && params.gap_policy.is_some() {
        return Err(ApiError::BadRequest(
            "gap_policy requires min_count".to_string(),
        ));
    }

    let Some(min_count) = min_count else {
        let result = get_or_compute(&state.cache, "diagnosis_icicle", || async {
            let mut documents: Vec<CategoryNode> =
                load_artifact(&state, Artifact::DiagnosisHierarchy).await?;
            Ok(IcicleResponse {
                data: documents.swap_remove(0),
            })
        })
        .await?;
        return Ok(Json(result));
    };

    let key = format!(
        "diagnosis_icicle:min_count={}:gap_policy={:?}",
        min_count, gap_policy
    );
    let result = get_or_compute(&state.cache, &key, || async {
        let counts: Vec<CodeCount> = load_artifact(&state, Artifact::DiagnosisCounts).await?;
        let (root, stats) = with_store(&state, move |store| {
            hierarchy_from_counts(&counts, store, min_count, gap_policy)
        })
        .await?;
        tracing::debug!(
            min_count,
            kept = stats.kept,
            below_threshold = stats.below_threshold,
            "diagnosis hierarchy computed"
        );
        Ok(IcicleResponse { data: root })
    })
    .await?;

    Ok(Json(result))
}

// ═══════════════════════════════════════════════════════════════════════════
// Admission heat-map and age distribution
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapResponse {
    pub data: Vec<HeatmapCell>,
}

/// `GET /api/v1/charts/admission-heatmap`
pub async fn admission_heatmap(
    State(state): State<AppState>,
) -> Result<Json<HeatmapResponse>, ApiError> {
    let result = get_or_compute(&state.cache, "admission_heatmap", || async {
        let data: Vec<HeatmapCell> = load_artifact(&state, Artifact::AdmissionHeatmap).await?;
        Ok(HeatmapResponse { data })
    })
    .await?;

    Ok(Json(result))
}

/// Query parameters for the age distribution.
#[derive(Debug, Default, Deserialize)]
pub struct AgeDistributionParams {
    /// `true` for one row per year of age instead of age buckets.
    pub detailed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgeDistributionResponse {
    pub data: Vec<AgeGroupCount>,
    /// Patients across all rows.
    pub total_records: u64,
    pub detailed: bool,
}

/// `GET /api/v1/charts/age-distribution[?detailed=true]`
pub async fn age_distribution(
    State(state): State<AppState>,
    Query(params): Query<AgeDistributionParams>,
) -> Result<Json<AgeDistributionResponse>, ApiError> {
    let detailed = match params.detailed.as_deref().map(str::trim) {
        None | Some("") | Some("false") | Some("0") => false,
        Some("true") | Some("1") => true,
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "detailed must be true or false, got '{}'",
                other
            )));
        }
    };
    let (key, artifact) = if detailed {
        ("age_distribution:detailed", Artifact::AgeDistributionDetailed)
    } else {
        ("age_distribution", Artifact::AgeDistribution)
    };

    let result = get_or_compute(&state.cache, key, || async {
        let data: Vec<AgeGroupCount> = load_artifact(&state, artifact).await?;
        Ok(AgeDistributionResponse {
            total_records: data.iter().map(|row| row.count).sum(),
            data,
            detailed,
        })
    })
    .await?;

    Ok(Json(result))
}

// ═══════════════════════════════════════════════════════════════════════════
// ICU stay duration
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcuStayResponse {
    pub data: Vec<CareUnitStay>,
    pub total_units: usize,
}

/// `GET /api/v1/charts/icu-stay-duration`
pub async fn icu_stay_duration(
    State(state): State<AppState>,
) -> Result<Json<IcuStayResponse>, ApiError> {
    let result = get_or_compute(&state.cache, "icu_stay_duration", || async {
        let data: Vec<CareUnitStay> = load_artifact(&state, Artifact::IcuStayDuration).await?;
        Ok(IcuStayResponse {
            total_units: data.len(),
            data,
        })
    })
    .await?;

    Ok(Json(result))
}
