//! Storage seams for build jobs and signing identities.
//!
//! The Postgres implementation in [`super::PgStore`] is the durable source of
//! truth; [`super::memory::MemoryStore`] applies the same rules in-process.

use async_trait::async_trait;
use std::path::Path;
use uuid::Uuid;

use crate::models::identity::SigningIdentity;
use crate::models::job::{BuildJob, JobStatus, JobTransition};
use crate::services::encryption::EncryptionError;

/// Persistent table of build jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly submitted job.
    async fn insert_job(&self, job: &BuildJob) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BuildJob>, StoreError>;

    /// Advance a job's status. Rejected unless the current status is a legal
    /// predecessor of the transition's target.
    async fn update_status(&self, job_id: Uuid, transition: &JobTransition)
        -> Result<(), StoreError>;

    /// Fail every job left `running` by a previous process. Returns their ids.
    async fn fail_orphaned_jobs(&self, message: &str) -> Result<Vec<Uuid>, StoreError>;

    /// Jobs still `pending`, oldest first.
    async fn pending_jobs(&self) -> Result<Vec<BuildJob>, StoreError>;

    /// Connectivity check backing `/health`.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Persistent table of per-domain signing identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_identity(&self, domain: &str) -> Result<Option<SigningIdentity>, StoreError>;

    async fn find_identity_by_keystore(
        &self,
        keystore_path: &Path,
    ) -> Result<Option<SigningIdentity>, StoreError>;

    /// Insert unless the domain already has a record; returns whichever record
    /// is persisted afterwards.
    async fn insert_identity(
        &self,
        identity: &SigningIdentity,
    ) -> Result<SigningIdentity, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Conflicting record: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Credential sealing failed: {0}")]
    Credential(#[from] EncryptionError),
}
