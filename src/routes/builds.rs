use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobStatus;
use crate::models::submission::{
    resolve_workspace_path, JobStatusResponse, SubmitRequest, SubmitResponse,
};
use crate::routes::error::{field_errors, ApiError, FieldError};

/// POST /api/v1/builds: accept a build and return its job id immediately.
pub async fn submit_build(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::Validation(vec![FieldError::new("body", rejection.body_text())])
    })?;

    let mut details = match request.validate() {
        Ok(()) => Vec::new(),
        Err(report) => field_errors(&report),
    };
    if let Some(requested) = &request.workspace_path {
        if let Err(message) = resolve_workspace_path(&state.workspace_root, requested) {
            details.push(FieldError::new("workspacePath", message));
        }
    }
    if !details.is_empty() {
        return Err(ApiError::Validation(details));
    }

    let job_id = state
        .scheduler
        .submit(request.into_inputs())
        .await
        .map_err(ApiError::internal)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

/// GET /api/v1/builds/{job_id}: current state of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    // A malformed id can't name a job.
    let job_id = Uuid::parse_str(&job_id).map_err(|_| ApiError::NotFound)?;

    let job = state
        .store
        .get_job(job_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(JobStatusResponse::from(job)))
}
