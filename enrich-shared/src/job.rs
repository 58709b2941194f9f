//! # Job Status
//!
//! Dispatcher-observed lifecycle of a single logical execution attempt:
//! `scheduled → processing → completed | failed`. A failed job that is
//! retryable with attempts remaining is the only state `retry` accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnrichError;

/// Lifecycle states observed through the status API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Scheduled => "scheduled",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Error surfaced to status consumers: kind + message, never a stack trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

impl From<&EnrichError> for JobError {
    fn from(e: &EnrichError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Canonical job status record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub task_name: String,
    pub entity_id: String,
    pub status: JobState,
    pub attempt_number: u32,
    pub max_retries: u32,
    pub retryable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
}

impl JobStatus {
    /// New record in the `scheduled` state
    pub fn scheduled(
        job_id: impl Into<String>,
        task_name: impl Into<String>,
        entity_id: impl Into<String>,
        attempt_number: u32,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            task_name: task_name.into(),
            entity_id: entity_id.into(),
            status: JobState::Scheduled,
            attempt_number,
            max_retries,
            retryable: true,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// The only state from which `retry` re-enters `scheduled`
    pub fn can_retry(&self) -> bool {
        self.status == JobState::Failed
            && self.retryable
            && self.attempt_number < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_constructor() {
        let status = JobStatus::scheduled("j-1", "account_enrichment", "acct-1", 1, 3);
        assert_eq!(status.status, JobState::Scheduled);
        assert_eq!(status.attempt_number, 1);
        assert!(status.retryable);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_can_retry_requires_failed_state() {
        let mut status = JobStatus::scheduled("j", "t", "e", 1, 3);
        assert!(!status.can_retry());
        status.status = JobState::Failed;
        assert!(status.can_retry());
    }

    #[test]
    fn test_can_retry_requires_retryable_flag() {
        let mut status = JobStatus::scheduled("j", "t", "e", 1, 3);
        status.status = JobState::Failed;
        status.retryable = false;
        assert!(!status.can_retry());
    }

    #[test]
    fn test_can_retry_requires_attempts_remaining() {
        let mut status = JobStatus::scheduled("j", "t", "e", 3, 3);
        status.status = JobState::Failed;
        assert!(!status.can_retry());
    }

    #[test]
    fn test_completed_is_terminal_for_retry() {
        let mut status = JobStatus::scheduled("j", "t", "e", 1, 3);
        status.status = JobState::Completed;
        assert!(!status.can_retry());
    }

    #[test]
    fn test_job_error_from_enrich_error() {
        let err = EnrichError::timeout("snapshot poll");
        let job_err = JobError::from(&err);
        assert_eq!(job_err.kind, "timeout");
        assert!(job_err.message.contains("snapshot poll"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(JobState::Scheduled.to_string(), "scheduled");
        assert_eq!(JobState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobState::Processing).unwrap(),
            "\"processing\""
        );
    }
}
