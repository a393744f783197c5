use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of a build job.
///
/// Status only ever moves forward: `pending -> running -> {completed | failed}`.
/// A job may also fail straight from `pending` when it can never be started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses a job may hold immediately before entering `self`.
    pub fn predecessors(self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Running => &[JobStatus::Pending],
            JobStatus::Completed => &[JobStatus::Running],
            JobStatus::Failed => &[JobStatus::Pending, JobStatus::Running],
        }
    }

    pub fn can_advance_to(self, next: JobStatus) -> bool {
        next.predecessors().contains(&self)
    }
}

/// Kinds of artifact a successful build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactKind {
    /// Installable package.
    Apk,
    /// Distribution bundle.
    Aab,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Apk => "apk",
            ArtifactKind::Aab => "aab",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Apk => "application/vnd.android.package-archive",
            ArtifactKind::Aab => "application/octet-stream",
        }
    }
}

/// Filenames of the signed artifacts of a completed job, keyed by artifact kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildArtifacts {
    pub apk: String,
    pub aab: String,
}

/// Inputs a job was submitted with. Persisted alongside the job so pending
/// work can be re-queued after a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobInputs {
    pub url: String,
    pub manifest_url: String,
    pub workspace_path: Option<String>,
}

/// A persisted build job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub inputs: JobInputs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<BuildArtifacts>,
    pub error: Option<String>,
}

impl BuildJob {
    /// A freshly submitted job in `pending` state.
    pub fn new(inputs: JobInputs) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            inputs,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    /// Apply a transition in place, enforcing forward-only status.
    pub fn apply(&mut self, transition: &JobTransition) -> Result<(), (JobStatus, JobStatus)> {
        let next = transition.status();
        if !self.status.can_advance_to(next) {
            return Err((self.status, next));
        }

        self.status = next;
        self.updated_at = Utc::now().max(self.created_at);
        match transition {
            JobTransition::Running => {}
            JobTransition::Completed(artifacts) => {
                self.result = Some(artifacts.clone());
                self.error = None;
            }
            JobTransition::Failed(message) => {
                self.result = None;
                self.error = Some(message.clone());
            }
        }
        Ok(())
    }
}

/// A status change recorded by the scheduler. Terminal variants carry exactly
/// one of result or error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTransition {
    Running,
    Completed(BuildArtifacts),
    Failed(String),
}

impl JobTransition {
    pub fn status(&self) -> JobStatus {
        match self {
            JobTransition::Running => JobStatus::Running,
            JobTransition::Completed(_) => JobStatus::Completed,
            JobTransition::Failed(_) => JobStatus::Failed,
        }
    }
}
