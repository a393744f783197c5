use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

use super::store::{JobStore, StoreError};
use super::PgStore;
use crate::models::job::{BuildArtifacts, BuildJob, JobInputs, JobStatus, JobTransition};

const JOB_COLUMNS: &str = "id, status, url, manifest_url, workspace_path, result, error, \
                           created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<BuildJob, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{}'", status_str)))?;
    let result: Option<Json<BuildArtifacts>> = row.try_get("result")?;

    Ok(BuildJob {
        id: row.try_get("id")?,
        status,
        inputs: JobInputs {
            url: row.try_get("url")?,
            manifest_url: row.try_get("manifest_url")?,
            workspace_path: row.try_get("workspace_path")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        result: result.map(|Json(artifacts)| artifacts),
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl JobStore for PgStore {
    /// Insert a new build job
    async fn insert_job(&self, job: &BuildJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO build_jobs (id, status, url, manifest_url, workspace_path, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(&job.inputs.url)
        .bind(&job.inputs.manifest_url)
        .bind(job.inputs.workspace_path.as_deref())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a job by ID
    async fn get_job(&self, job_id: Uuid) -> Result<Option<BuildJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM build_jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Advance job status; the WHERE clause only matches legal predecessors
    async fn update_status(
        &self,
        job_id: Uuid,
        transition: &JobTransition,
    ) -> Result<(), StoreError> {
        let next = transition.status();
        let allowed_from: Vec<String> = next.predecessors().iter().map(|s| s.to_string()).collect();
        let (result, error) = match transition {
            JobTransition::Running => (None, None),
            JobTransition::Completed(artifacts) => (Some(Json(artifacts.clone())), None),
            JobTransition::Failed(message) => (None, Some(message.as_str())),
        };

        let updated = sqlx::query(
            r#"
            UPDATE build_jobs
            SET status = $2,
                result = $3,
                error = $4,
                updated_at = GREATEST(NOW(), created_at),
                started_at = CASE WHEN $2 = 'running' THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $2 IN ('completed', 'failed') THEN NOW() ELSE finished_at END
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(job_id)
        .bind(next.to_string())
        .bind(result)
        .bind(error)
        .bind(&allowed_from)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_job(job_id).await? {
            Some(current) => Err(StoreError::InvalidTransition {
                job_id,
                from: current.status,
                to: next,
            }),
            None => Err(StoreError::NotFound(job_id)),
        }
    }

    /// Fail jobs a previous process left running
    async fn fail_orphaned_jobs(&self, message: &str) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE build_jobs
            SET status = 'failed',
                error = $1,
                result = NULL,
                updated_at = GREATEST(NOW(), created_at),
                finished_at = NOW()
            WHERE status = 'running'
            RETURNING id
            "#,
        )
        .bind(message)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<Uuid, _>("id").map_err(StoreError::from))
            .collect()
    }

    /// Get pending jobs in submission order
    async fn pending_jobs(&self) -> Result<Vec<BuildJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM build_jobs WHERE status = 'pending' ORDER BY created_at ASC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
