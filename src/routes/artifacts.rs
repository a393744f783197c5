use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};

use crate::app_state::AppState;
use crate::routes::error::ApiError;
use crate::services::artifacts::ArtifactError;

/// GET /api/v1/artifacts/{filename}: download a signed artifact.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let file = state.artifacts.open(&filename).await.map_err(|e| match e {
        ArtifactError::NotFound => ApiError::NotFound,
        other => ApiError::internal(other),
    })?;

    tracing::debug!(filename = %filename, bytes = file.bytes.len(), "Serving artifact");
    Ok((
        [
            (CONTENT_TYPE, file.kind.content_type().to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        file.bytes,
    )
        .into_response())
}
