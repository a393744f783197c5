//! In-process store with the same semantics as the Postgres tables.
//!
//! Nothing here survives a restart; it backs the test-suite and local runs
//! where durability does not matter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{IdentityStore, JobStore, StoreError};
use crate::models::identity::SigningIdentity;
use crate::models::job::{BuildJob, JobStatus, JobTransition};

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<Uuid, BuildJob>>,
    identities: RwLock<HashMap<String, SigningIdentity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn identity_count(&self) -> usize {
        self.identities.read().await.len()
    }

    pub async fn jobs_with_status(&self, status: JobStatus) -> Vec<Uuid> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == status)
            .map(|job| job.id)
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &BuildJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BuildJob>, StoreError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn update_status(
        &self,
        job_id: Uuid,
        transition: &JobTransition,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        job.apply(transition)
            .map_err(|(from, to)| StoreError::InvalidTransition { job_id, from, to })
    }

    async fn fail_orphaned_jobs(&self, message: &str) -> Result<Vec<Uuid>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let mut failed = Vec::new();
        for job in jobs.values_mut().filter(|j| j.status == JobStatus::Running) {
            if job
                .apply(&JobTransition::Failed(message.to_string()))
                .is_ok()
            {
                failed.push(job.id);
            }
        }
        Ok(failed)
    }

    async fn pending_jobs(&self) -> Result<Vec<BuildJob>, StoreError> {
        let mut pending: Vec<BuildJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.created_at);
        Ok(pending)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_identity(&self, domain: &str) -> Result<Option<SigningIdentity>, StoreError> {
        Ok(self.identities.read().await.get(domain).cloned())
    }

    async fn find_identity_by_keystore(
        &self,
        keystore_path: &Path,
    ) -> Result<Option<SigningIdentity>, StoreError> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|i| i.keystore_path == keystore_path)
            .cloned())
    }

    async fn insert_identity(
        &self,
        identity: &SigningIdentity,
    ) -> Result<SigningIdentity, StoreError> {
        let mut identities = self.identities.write().await;
        if let Some(existing) = identities.get(&identity.domain) {
            return Ok(existing.clone());
        }
        if identities
            .values()
            .any(|i| i.keystore_path == identity.keystore_path)
        {
            return Err(StoreError::Conflict(format!(
                "keystore {} already belongs to another domain",
                identity.keystore_path.display()
            )));
        }
        identities.insert(identity.domain.clone(), identity.clone());
        Ok(identity.clone())
    }
}
