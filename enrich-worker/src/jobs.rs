//! # Job Status Store
//!
//! In-process record of every job the dispatcher has seen, backing the
//! status, failed-listing, and retry endpoints. Writes come from the
//! runner's lifecycle transitions; reads are concurrent and lock-free.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::job::{JobError, JobState, JobStatus};

/// Concurrent job-status map keyed by `job_id`
#[derive(Debug, Default)]
pub struct JobStatusStore {
    jobs: DashMap<String, JobStatus>,
}

impl JobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly scheduled job. Re-creating an existing `job_id`
    /// resets it to `scheduled` (a retry attempt reuses the store entry).
    pub fn create(&self, status: JobStatus) {
        self.jobs.insert(status.job_id.clone(), status);
    }

    /// Transition to `processing`, creating the record if the execute path
    /// was invoked without a prior create.
    pub fn mark_processing(
        &self,
        job_id: &str,
        task_name: &str,
        entity_id: &str,
        attempt_number: u32,
        max_retries: u32,
    ) {
        let mut entry = self
            .jobs
            .entry(job_id.to_string())
            .or_insert_with(|| {
                JobStatus::scheduled(job_id, task_name, entity_id, attempt_number, max_retries)
            });
        entry.status = JobState::Processing;
        entry.updated_at = Utc::now();
    }

    /// Terminal success
    pub fn mark_completed(&self, job_id: &str) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.status = JobState::Completed;
            entry.updated_at = Utc::now();
        }
    }

    /// Terminal failure with its classification
    pub fn mark_failed(&self, job_id: &str, error: &EnrichError) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.status = JobState::Failed;
            entry.retryable = error.is_retryable();
            entry.last_error = Some(JobError::from(error));
            entry.updated_at = Utc::now();
        }
    }

    /// Current status for a job
    pub fn get(&self, job_id: &str) -> EnrichResult<JobStatus> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| EnrichError::not_found(format!("job {job_id} not found")))
    }

    /// Failed jobs inside a date window, newest first, capped at `limit`
    pub fn list_failed(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        retryable_only: bool,
        limit: usize,
    ) -> Vec<JobStatus> {
        let mut failed: Vec<JobStatus> = self
            .jobs
            .iter()
            .filter(|entry| entry.status == JobState::Failed)
            .filter(|entry| entry.updated_at >= start && entry.updated_at <= end)
            .filter(|entry| !retryable_only || entry.retryable)
            .map(|entry| entry.clone())
            .collect();
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        failed.truncate(limit);
        failed
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
