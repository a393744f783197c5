use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::models::job::{BuildArtifacts, BuildJob, JobInputs, JobStatus};

/// Request to build a web app into signed Android artifacts.
///
/// Missing fields deserialize as empty strings so they are reported through
/// the same field-level validation as malformed ones.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    #[garde(length(min = 1, max = 2048), url, custom(http_scheme))]
    pub url: String,

    #[serde(default)]
    #[garde(length(min = 1, max = 2048), url, custom(http_scheme))]
    pub manifest_url: String,

    #[garde(length(min = 1, max = 512))]
    pub workspace_path: Option<String>,
}

fn http_scheme(value: &str, _ctx: &()) -> garde::Result {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
        Ok(_) => Err(garde::Error::new("must be an http(s) URL with a host")),
        // `url` already reports unparseable values
        Err(_) => Ok(()),
    }
}

impl SubmitRequest {
    pub fn into_inputs(self) -> JobInputs {
        JobInputs {
            url: self.url,
            manifest_url: self.manifest_url,
            workspace_path: self.workspace_path,
        }
    }
}

/// Resolve a caller-supplied workspace path against the workspace root.
///
/// Relative paths are joined onto the root; absolute paths must already lie
/// under it. Parent-directory components are never accepted.
pub fn resolve_workspace_path(root: &Path, requested: &str) -> Result<PathBuf, &'static str> {
    let requested = Path::new(requested);
    if requested
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err("must not contain '..' components");
    }

    let resolved = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    if !resolved.starts_with(root) || resolved == root {
        return Err("must be inside the workspace root");
    }
    Ok(resolved)
}

/// Response after submitting a build.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: uuid::Uuid,
    pub status: JobStatus,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: uuid::Uuid,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildArtifacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<BuildJob> for JobStatusResponse {
    fn from(job: BuildJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            created: job.created_at,
            updated: job.updated_at,
            result: job.result,
            error: job.error,
        }
    }
}
