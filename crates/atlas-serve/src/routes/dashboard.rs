//! Dashboard endpoint.

use axum::Json;
use axum::extract::State;

use atlas_build::jobs::Artifact;
use atlas_build::jobs::dashboard::DashboardStats;

use super::load_artifact;
use crate::cache::get_or_compute;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/v1/dashboard/stats`
pub async fn stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    let result = get_or_compute(&state.cache, "dashboard_stats", || async {
        let mut documents: Vec<DashboardStats> =
            load_artifact(&state, Artifact::DashboardStats).await?;
        Ok(documents.swap_remove(0))
    })
    .await?;

    Ok(Json(result))
}
