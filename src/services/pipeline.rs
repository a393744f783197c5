use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::BuildArtifacts;
use crate::models::submission::resolve_workspace_path;
use crate::services::artifacts::{ArtifactError, ArtifactStore};
use crate::services::fetch::{FetchError, ResilientFetch};
use crate::services::scheduler::QueuedJob;
use crate::services::signing::{normalize_domain, IdentityCache, IdentityError};
use crate::services::toolchain::{ProjectSpec, Toolchain, ToolchainError};

/// Turns one queued job into signed artifacts, or fails.
#[async_trait]
pub trait BuildPipeline: Send + Sync {
    async fn run(&self, job: &QueuedJob) -> Result<BuildArtifacts, PipelineError>;
}

/// Manifest -> native project -> unsigned build -> signed build -> output dir.
pub struct AndroidPipeline {
    fetch: ResilientFetch,
    toolchain: Arc<dyn Toolchain>,
    identities: Arc<IdentityCache>,
    artifacts: ArtifactStore,
    workspace_root: PathBuf,
}

/// A job's working directory.
///
/// Owned workspaces are removed by [`Workspace::release`], or on drop when the
/// job future is cancelled (timeout) or unwinds (panic) before reaching it.
struct Workspace {
    path: PathBuf,
    job_id: Uuid,
    /// Created by this job, so removed when the job ends.
    owned: bool,
}

impl Workspace {
    async fn release(mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            tracing::warn!(
                job_id = %self.job_id,
                workspace = %self.path.display(),
                error = %e,
                "Failed to remove workspace"
            );
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let job_id = self.job_id;
        let remove = move || match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(
                    job_id = %job_id,
                    workspace = %path.display(),
                    "Removed abandoned workspace"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    workspace = %path.display(),
                    error = %e,
                    "Failed to remove abandoned workspace"
                );
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

impl AndroidPipeline {
    pub fn new(
        fetch: ResilientFetch,
        toolchain: Arc<dyn Toolchain>,
        identities: Arc<IdentityCache>,
        artifacts: ArtifactStore,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetch,
            toolchain,
            identities,
            artifacts,
            workspace_root: workspace_root.into(),
        }
    }

    async fn resolve_workspace(
        &self,
        job: &QueuedJob,
        domain: &str,
    ) -> Result<Workspace, PipelineError> {
        if let Some(requested) = &job.inputs.workspace_path {
            let path = resolve_workspace_path(&self.workspace_root, requested)
                .map_err(|reason| PipelineError::Workspace(reason.to_string()))?;
            if tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
            {
                tracing::info!(
                    job_id = %job.job_id,
                    workspace = %path.display(),
                    "Reusing workspace"
                );
                return Ok(Workspace {
                    path,
                    job_id: job.job_id,
                    owned: false,
                });
            }
            tracing::info!(
                job_id = %job.job_id,
                workspace = %path.display(),
                "Requested workspace missing, generating a new one"
            );
        }

        let path = self.workspace_root.join(job.job_id.to_string());
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(PipelineError::Io)?;
        let workspace = Workspace {
            path,
            job_id: job.job_id,
            owned: true,
        };

        if let Err(e) = self.generate(job, domain, &workspace.path).await {
            workspace.release().await;
            return Err(e);
        }
        Ok(workspace)
    }

    async fn generate(
        &self,
        job: &QueuedJob,
        domain: &str,
        path: &Path,
    ) -> Result<(), PipelineError> {
        tracing::debug!(
            job_id = %job.job_id,
            manifest_url = %job.inputs.manifest_url,
            "Fetching web manifest"
        );
        let manifest: serde_json::Value = self
            .fetch
            .fetch(&job.inputs.manifest_url)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::Manifest(e.to_string()))?;
        if !manifest.is_object() {
            return Err(PipelineError::Manifest("manifest is not a JSON object".to_string()));
        }

        let spec = ProjectSpec {
            host: domain.to_string(),
            start_url: job.inputs.url.clone(),
            web_manifest_url: job.inputs.manifest_url.clone(),
            package_id: package_id(domain),
            manifest,
        };
        self.toolchain.generate_project(path, &spec).await?;
        Ok(())
    }

    async fn build_in(
        &self,
        job: &QueuedJob,
        domain: &str,
        workspace: &Path,
    ) -> Result<BuildArtifacts, PipelineError> {
        let unsigned = self.toolchain.build(workspace).await?;
        require_file(&unsigned.apk).await?;
        require_file(&unsigned.aab).await?;
        tracing::info!(job_id = %job.job_id, "Unsigned artifacts built");

        let identity = self.identities.get_or_create(domain).await?;

        let signed = self
            .toolchain
            .sign(&unsigned, &identity, &workspace.join("signed"))
            .await?;
        require_file(&signed.apk).await?;
        require_file(&signed.aab).await?;
        tracing::info!(job_id = %job.job_id, domain = %domain, "Artifacts signed");

        Ok(self.artifacts.relocate(&signed, &job.inputs.url).await?)
    }
}

#[async_trait]
impl BuildPipeline for AndroidPipeline {
    async fn run(&self, job: &QueuedJob) -> Result<BuildArtifacts, PipelineError> {
        let domain = normalize_domain(&job.inputs.url)?;
        let workspace = self.resolve_workspace(job, &domain).await?;

        let outcome = self.build_in(job, &domain, &workspace.path).await;
        workspace.release().await;
        outcome
    }
}

async fn require_file(path: &Path) -> Result<(), PipelineError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(PipelineError::MissingArtifact(path.to_path_buf())),
    }
}

/// Android application id from a host: labels reversed, sanitized, `.twa` appended.
pub fn package_id(domain: &str) -> String {
    let mut segments: Vec<String> = domain
        .split('.')
        .filter(|label| !label.is_empty())
        .rev()
        .map(|label| {
            let mut segment: String = label
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
                .collect();
            if !segment.starts_with(|c: char| c.is_ascii_alphabetic()) {
                segment.insert(0, 'a');
            }
            segment
        })
        .collect();
    segments.push("twa".to_string());
    segments.join(".")
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid workspace: {0}")]
    Workspace(String),

    #[error("Workspace I/O failed: {0}")]
    Io(std::io::Error),

    #[error("Manifest fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("External tool failed: {0}")]
    Toolchain(#[from] ToolchainError),

    #[error("Expected file missing: {0}")]
    MissingArtifact(PathBuf),

    #[error("Signing identity unavailable: {0}")]
    Identity(#[from] IdentityError),

    #[error("Artifact relocation failed: {0}")]
    Artifact(#[from] ArtifactError),
}
