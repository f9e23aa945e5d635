//! API route definitions.

mod charts;
mod dashboard;
mod health;

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use serde::de::DeserializeOwned;

use atlas_build::jobs::Artifact;
use atlas_build::store::read_artifact_as;
use atlas_build::SqliteStore;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the complete API router.
///
/// # Route Structure
///
/// - `GET /health` - Health check
/// - `GET /api/v1/charts/hospital-transfers-chord` - Ward transfer graph
/// - `GET /api/v1/charts/medications-sunburst` - Drugs nested under route
/// - `GET /api/v1/charts/diagnosis-icicle` - ICD category hierarchy (`?min_count=N`)
/// - `GET /api/v1/charts/admission-heatmap` - Admissions by weekday and hour
/// - `GET /api/v1/charts/age-distribution` - Patients by age bucket and gender (`?detailed=true` per year)
/// - `GET /api/v1/charts/icu-stay-duration` - ICU length of stay per care unit
/// - `GET /api/v1/dashboard/stats` - Headline numbers
pub fn router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route(
            "/charts/hospital-transfers-chord",
            get(charts::hospital_transfers_chord),
        )
        .route("/charts/medications-sunburst", get(charts::medications_sunburst))
        .route("/charts/diagnosis-icicle", get(charts::diagnosis_icicle))
        .route("/charts/admission-heatmap", get(charts::admission_heatmap))
        .route("/charts/age-distribution", get(charts::age_distribution))
        .route("/charts/icu-stay-duration", get(charts::icu_stay_duration))
        .route("/dashboard/stats", get(dashboard::stats))
        .layer(middleware::map_response(add_cache_headers));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api_v1)
        .with_state(state)
}

/// Let clients cache successful responses for a minute.
async fn add_cache_headers(response: Response) -> Response {
    if response.status().is_success() {
        let (mut parts, body) = response.into_parts();
        parts.headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=60, stale-while-revalidate=300"),
        );
        Response::from_parts(parts, body)
    } else {
        response
    }
}

/// Run a store read on the blocking pool.
async fn with_store<T, F>(state: &AppState, read: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&SqliteStore) -> atlas_build::Result<T> + Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || read(&store))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("store task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Read every document of an artifact; 404 when it has not been built.
async fn load_artifact<T>(state: &AppState, artifact: Artifact) -> Result<Vec<T>, ApiError>
where
    T: DeserializeOwned + Send + 'static,
{
    let documents: Vec<T> =
        with_store(state, move |store| read_artifact_as(store, artifact.name())).await?;
    if documents.is_empty() {
        return Err(ApiError::NotFound(format!(
            "artifact '{}' has not been built",
            artifact
        )));
    }
    Ok(documents)
}
