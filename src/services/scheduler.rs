use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::SchedulerSettings;
use crate::db::store::{JobStore, StoreError};
use crate::models::job::{BuildArtifacts, BuildJob, JobInputs, JobStatus, JobTransition};
use crate::services::pipeline::BuildPipeline;

/// The only error text a failed job ever exposes.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "The build could not be completed. Check that the app URL and manifest are reachable, then try again.";

/// Error recorded for jobs a previous process left running.
pub const INTERRUPTED_MESSAGE: &str =
    "The build was interrupted by a service restart. Please submit it again.";

/// Queue entry: a job id plus the inputs the pipeline needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub inputs: JobInputs,
}

impl From<&BuildJob> for QueuedJob {
    fn from(job: &BuildJob) -> Self {
        Self {
            job_id: job.id,
            inputs: job.inputs.clone(),
        }
    }
}

/// Point-in-time load of the scheduler.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SchedulerStats {
    pub capacity: usize,
    pub running: usize,
    pub pending: usize,
}

/// Outcome of startup recovery.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed_orphans: Vec<Uuid>,
    pub requeued: Vec<Uuid>,
}

/// Non-terminal jobs this process knows about.
#[derive(Default)]
struct LiveJobs {
    jobs: Mutex<HashMap<Uuid, JobStatus>>,
}

impl LiveJobs {
    fn set(&self, job_id: Uuid, status: JobStatus) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job_id, status);
        publish_gauges(&jobs);
    }

    fn remove(&self, job_id: Uuid) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.remove(&job_id);
        publish_gauges(&jobs);
    }

    fn get(&self, job_id: Uuid) -> Option<JobStatus> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .copied()
    }

    fn counts(&self) -> (usize, usize) {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        count_by_status(&jobs)
    }
}

fn count_by_status(jobs: &HashMap<Uuid, JobStatus>) -> (usize, usize) {
    jobs.values().fold((0, 0), |(running, pending), status| match status {
        JobStatus::Running => (running + 1, pending),
        JobStatus::Pending => (running, pending + 1),
        _ => (running, pending),
    })
}

fn publish_gauges(jobs: &HashMap<Uuid, JobStatus>) {
    let (running, pending) = count_by_status(jobs);
    metrics::gauge!("build_jobs_running").set(running as f64);
    metrics::gauge!("build_queue_depth").set(pending as f64);
}

/// Bounded-concurrency FIFO job scheduler.
///
/// A fixed pool of `max_concurrent_builds` workers pulls from one queue. The
/// receiver sits behind an async mutex, so pops are serialized and the head of
/// the queue always goes to the next worker that frees up. Each worker owns at
/// most one job at a time, which caps `running` jobs at the pool size no matter
/// how deep the queue gets.
pub struct Scheduler {
    queue: mpsc::UnboundedSender<QueuedJob>,
    store: Arc<dyn JobStore>,
    live: Arc<LiveJobs>,
    capacity: usize,
}

/// What each worker needs to run a job.
struct Worker {
    store: Arc<dyn JobStore>,
    pipeline: Arc<dyn BuildPipeline>,
    live: Arc<LiveJobs>,
    build_timeout: Duration,
}

impl Scheduler {
    /// Spawn the worker pool. Must be called inside a Tokio runtime.
    pub fn start(
        store: Arc<dyn JobStore>,
        pipeline: Arc<dyn BuildPipeline>,
        settings: &SchedulerSettings,
    ) -> Self {
        let capacity = settings.max_concurrent_builds.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let live = Arc::new(LiveJobs::default());
        let worker = Arc::new(Worker {
            store: store.clone(),
            pipeline,
            live: live.clone(),
            build_timeout: settings.build_timeout,
        });

        for slot in 0..capacity {
            let receiver = receiver.clone();
            let worker = worker.clone();
            tokio::spawn(async move {
                tracing::debug!(slot, "Build worker started");
                loop {
                    let next = receiver.lock().await.recv().await;
                    match next {
                        Some(job) => worker.execute(job).await,
                        None => break,
                    }
                }
                tracing::debug!(slot, "Build worker stopped");
            });
        }

        tracing::info!(capacity, "Scheduler started");
        Self {
            queue: sender,
            store,
            live,
            capacity,
        }
    }

    /// Persist a new `pending` job and append it to the queue. Never waits on
    /// build execution.
    pub async fn submit(&self, inputs: JobInputs) -> Result<Uuid, SchedulerError> {
        let job = BuildJob::new(inputs);
        self.store.insert_job(&job).await?;
        self.enqueue(QueuedJob::from(&job))?;

        metrics::counter!("build_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job.id, url = %job.inputs.url, "Build job submitted");
        Ok(job.id)
    }

    /// Fail jobs orphaned by a previous process and re-queue its pending jobs
    /// in submission order. Run once at startup, before accepting submissions.
    pub async fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let failed_orphans = self.store.fail_orphaned_jobs(INTERRUPTED_MESSAGE).await?;
        for job_id in &failed_orphans {
            tracing::warn!(job_id = %job_id, "Failed job orphaned by a previous run");
        }

        let mut requeued = Vec::new();
        for job in self.store.pending_jobs().await? {
            self.enqueue(QueuedJob::from(&job))?;
            requeued.push(job.id);
        }

        tracing::info!(
            failed = failed_orphans.len(),
            requeued = requeued.len(),
            "Recovered jobs from previous run"
        );
        Ok(RecoveryReport {
            failed_orphans,
            requeued,
        })
    }

    /// Status of a job still queued or running in this process.
    pub fn live_status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.live.get(job_id)
    }

    pub fn stats(&self) -> SchedulerStats {
        let (running, pending) = self.live.counts();
        SchedulerStats {
            capacity: self.capacity,
            running,
            pending,
        }
    }

    fn enqueue(&self, job: QueuedJob) -> Result<(), SchedulerError> {
        let job_id = job.job_id;
        self.live.set(job_id, JobStatus::Pending);
        if self.queue.send(job).is_err() {
            self.live.remove(job_id);
            return Err(SchedulerError::Stopped);
        }
        Ok(())
    }
}

impl Worker {
    async fn execute(&self, job: QueuedJob) {
        let job_id = job.job_id;

        match self.store.update_status(job_id, &JobTransition::Running).await {
            Ok(()) => {}
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    job_id = %job_id,
                    status = %from,
                    "Dequeued job is no longer pending, skipping"
                );
                self.live.remove(job_id);
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job running");
                self.record(job_id, JobTransition::Failed(GENERIC_FAILURE_MESSAGE.to_string()))
                    .await;
                self.live.remove(job_id);
                return;
            }
        }
        self.live.set(job_id, JobStatus::Running);
        tracing::info!(job_id = %job_id, url = %job.inputs.url, "Build job running");

        let started = Instant::now();
        let transition = match self.run_pipeline(job).await {
            Ok(artifacts) => {
                metrics::counter!("build_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job_id,
                    apk = %artifacts.apk,
                    aab = %artifacts.aab,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Build job completed"
                );
                JobTransition::Completed(artifacts)
            }
            Err(detail) => {
                metrics::counter!("build_jobs_failed_total").increment(1);
                tracing::error!(
                    job_id = %job_id,
                    error = %detail,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Build job failed"
                );
                JobTransition::Failed(GENERIC_FAILURE_MESSAGE.to_string())
            }
        };
        metrics::histogram!("build_duration_seconds").record(started.elapsed().as_secs_f64());

        self.record(job_id, transition).await;
        self.live.remove(job_id);
    }

    /// Run the pipeline on its own task so a panic or timeout stays job-scoped.
    /// The error string is for logs only.
    async fn run_pipeline(&self, job: QueuedJob) -> Result<BuildArtifacts, String> {
        let pipeline = self.pipeline.clone();
        let mut handle = tokio::spawn(async move { pipeline.run(&job).await });

        match tokio::time::timeout(self.build_timeout, &mut handle).await {
            Ok(Ok(Ok(artifacts))) => Ok(artifacts),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_error)) => Err(format!("pipeline task aborted: {}", join_error)),
            Err(_) => {
                // Dropping the pipeline future kills any child process.
                handle.abort();
                Err(format!("timed out after {}s", self.build_timeout.as_secs()))
            }
        }
    }

    async fn record(&self, job_id: Uuid, transition: JobTransition) {
        if let Err(e) = self.store.update_status(job_id, &transition).await {
            tracing::error!(
                job_id = %job_id,
                status = %transition.status(),
                error = %e,
                "Failed to persist job transition"
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler is not accepting jobs")]
    Stopped,
}
