//! REST handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use quarry_shared::{ContextDocument, JobId, JobSummary, QuarryError, ReportId, ReportRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_JOB_LIMIT: u32 = 20;
const MAX_JOB_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub context: Vec<ContextDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub job_id: JobId,
    pub report_id: ReportId,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    limit: Option<u32>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Persist the job, start it in the background, return its ids immediately.
pub async fn create_research(
    State(state): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> Result<Json<ResearchResponse>, ApiError> {
    let submitted = state
        .pipeline
        .submit(&request.query, request.context)
        .await?;
    let response = ResearchResponse {
        job_id: submitted.job.id,
        report_id: submitted.report_id,
    };

    info!(job_id = %response.job_id, report_id = %response.report_id, "research accepted");
    // Failures are persisted and published by the pipeline itself.
    drop(state.pipeline.spawn(submitted));

    Ok(Json(response))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(report_id): Path<ReportId>,
) -> Result<Json<ReportRecord>, ApiError> {
    state
        .pipeline
        .store()
        .get_report(report_id)
        .await?
        .map(Json)
        .ok_or_else(|| QuarryError::NotFound(format!("report {report_id}")).into())
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobsQuery>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_JOB_LIMIT).clamp(1, MAX_JOB_LIMIT);
    Ok(Json(state.pipeline.store().list_jobs(limit).await?))
}
