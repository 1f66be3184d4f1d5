//! Composition and render job handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vcomp_composer::{ComposeOptions, CompositionStatus};
use vcomp_models::{AssetId, Composition, JobId, Priority};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Body of `POST /api/compositions`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCompositionRequest {
    pub content_asset_id: String,
    #[serde(default)]
    pub options: ComposeOptions,
}

/// Body of `POST /api/renders`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub composition: Composition,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAcceptedResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<CompositionStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Build a composition around a content clip and queue its render.
pub async fn create_composition(
    State(state): State<AppState>,
    payload: Result<Json<CreateCompositionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAcceptedResponse>)> {
    let request = body(payload)?;
    if request.content_asset_id.trim().is_empty() {
        return Err(ApiError::bad_request("contentAssetId is required"));
    }

    let content_id = AssetId::from(request.content_asset_id);
    let job_id = state.composer.compose(&content_id, request.options).await?;
    metrics::record_composition_requested("compose");

    info!(job_id = %job_id, content_id = %content_id, "Composition job accepted");
    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse { job_id })))
}

/// Queue the render of a caller-supplied composition.
pub async fn create_render(
    State(state): State<AppState>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAcceptedResponse>)> {
    let request = body(payload)?;
    let composition_id = request.composition.id.clone();
    let job_id = state.composer.submit(request.composition, request.priority)?;
    metrics::record_composition_requested("render");

    info!(job_id = %job_id, composition_id = %composition_id, "Render job accepted");
    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse { job_id })))
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.composer.list(),
    })
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CompositionStatus>> {
    state
        .composer
        .status(&JobId::from(job_id.clone()))
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job {job_id}")))
}

/// Cancel a pending or running job; `false` when it is unknown or already finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<CancelResponse> {
    let job_id = JobId::from(job_id);
    let cancelled = state.composer.cancel(&job_id);
    info!(job_id = %job_id, cancelled, "Cancel requested");
    Json(CancelResponse { cancelled })
}
