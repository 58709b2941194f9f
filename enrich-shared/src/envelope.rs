//! # Callback Envelope
//!
//! Canonical wire shapes exchanged with the primary application: the
//! callback envelope, pagination metadata, and the task-result summary a
//! task execution returns. This is the single definition both crates
//! consume.
//!
//! A terminal envelope (`completed` or `failed`) is the final one for its
//! `job_id` regardless of how many pagination fragments were emitted.
//! Receivers treat duplicate terminals for the same `(job_id, page)` as
//! idempotent; senders never deduplicate because exactly-once delivery is
//! not guaranteed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task / callback status over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CallbackStatus {
    /// Terminal statuses end the job's callback stream
    pub fn is_terminal(self) -> bool {
        matches!(self, CallbackStatus::Completed | CallbackStatus::Failed)
    }
}

impl std::fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallbackStatus::Pending => "pending",
            CallbackStatus::Processing => "processing",
            CallbackStatus::Completed => "completed",
            CallbackStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-page lead counts inside a pagination block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkCounts {
    pub qualified_leads: usize,
    pub structured_leads: usize,
    pub all_leads: usize,
}

/// Pagination metadata attached to fragmented terminal callbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMeta {
    /// 1-based page number
    pub page: usize,
    pub total_pages: usize,
    pub leads_per_page: usize,
    pub total_leads: usize,
    pub current_chunk: ChunkCounts,
}

/// The canonical callback body sent to the primary application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    pub job_id: String,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    pub status: CallbackStatus,
    pub enrichment_type: String,
    pub source: String,
    pub is_partial: bool,
    pub completion_percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Present iff total_pages > 1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Side-band chain state for dependent follow-up tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestration_data: Option<Value>,
}

impl CallbackEnvelope {
    /// Start a builder for the given job and account
    pub fn builder(job_id: impl Into<String>, account_id: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder {
            envelope: CallbackEnvelope {
                job_id: job_id.into(),
                account_id: account_id.into(),
                lead_id: None,
                status: CallbackStatus::Processing,
                enrichment_type: "company_info".to_string(),
                source: "jina_ai".to_string(),
                is_partial: false,
                completion_percentage: 0,
                raw_data: None,
                processed_data: None,
                error_details: None,
                attempt_number: None,
                max_retries: None,
                pagination: None,
                trace_id: None,
                orchestration_data: None,
            },
        }
    }

    /// Terminal envelopes end the job's stream
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fluent construction for callback envelopes
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    envelope: CallbackEnvelope,
}

impl EnvelopeBuilder {
    pub fn status(mut self, status: CallbackStatus) -> Self {
        self.envelope.status = status;
        self
    }

    pub fn enrichment_type(mut self, value: impl Into<String>) -> Self {
        self.envelope.enrichment_type = value.into();
        self
    }

    pub fn source(mut self, value: impl Into<String>) -> Self {
        self.envelope.source = value.into();
        self
    }

    pub fn lead_id(mut self, value: Option<String>) -> Self {
        self.envelope.lead_id = value;
        self
    }

    pub fn completion(mut self, percentage: u8) -> Self {
        self.envelope.completion_percentage = percentage.min(100);
        self
    }

    pub fn is_partial(mut self, value: bool) -> Self {
        self.envelope.is_partial = value;
        self
    }

    pub fn raw_data(mut self, value: Option<Value>) -> Self {
        self.envelope.raw_data = value;
        self
    }

    pub fn processed_data(mut self, value: Option<Value>) -> Self {
        self.envelope.processed_data = value;
        self
    }

    pub fn error_details(mut self, value: Option<Value>) -> Self {
        self.envelope.error_details = value;
        self
    }

    pub fn attempts(mut self, attempt_number: Option<u32>, max_retries: Option<u32>) -> Self {
        self.envelope.attempt_number = attempt_number;
        self.envelope.max_retries = max_retries;
        self
    }

    pub fn trace_id(mut self, value: Option<String>) -> Self {
        self.envelope.trace_id = value;
        self
    }

    pub fn orchestration_data(mut self, value: Option<Value>) -> Self {
        self.envelope.orchestration_data = value;
        self
    }

    pub fn build(self) -> CallbackEnvelope {
        self.envelope
    }
}

/// Result summary a task execution returns to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: CallbackStatus,
    pub completion_percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl TaskResult {
    pub fn completed(processed_data: Option<Value>) -> Self {
        Self {
            status: CallbackStatus::Completed,
            completion_percentage: 100,
            processed_data,
            error: None,
        }
    }

    pub fn failed(error: Value) -> Self {
        Self {
            status: CallbackStatus::Failed,
            completion_percentage: 100,
            processed_data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&CallbackStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::from_str::<CallbackStatus>("\"failed\"").unwrap(),
            CallbackStatus::Failed
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CallbackStatus::Completed.is_terminal());
        assert!(CallbackStatus::Failed.is_terminal());
        assert!(!CallbackStatus::Processing.is_terminal());
        assert!(!CallbackStatus::Pending.is_terminal());
    }

    #[test]
    fn test_builder_defaults() {
        let envelope = CallbackEnvelope::builder("j-1", "a-1").build();
        assert_eq!(envelope.job_id, "j-1");
        assert_eq!(envelope.account_id, "a-1");
        assert_eq!(envelope.status, CallbackStatus::Processing);
        assert_eq!(envelope.completion_percentage, 0);
        assert!(!envelope.is_partial);
        assert!(envelope.pagination.is_none());
    }

    #[test]
    fn test_completion_clamped_to_100() {
        let envelope = CallbackEnvelope::builder("j", "a").completion(150).build();
        assert_eq!(envelope.completion_percentage, 100);
    }

    #[test]
    fn test_optional_fields_omitted_from_wire() {
        let envelope = CallbackEnvelope::builder("j-1", "a-1").build();
        let wire = serde_json::to_value(&envelope).unwrap();
        let obj = wire.as_object().unwrap();
        assert!(!obj.contains_key("pagination"));
        assert!(!obj.contains_key("trace_id"));
        assert!(!obj.contains_key("raw_data"));
        assert!(!obj.contains_key("orchestration_data"));
        assert!(obj.contains_key("is_partial"));
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = CallbackEnvelope::builder("j-2", "a-2")
            .status(CallbackStatus::Completed)
            .completion(100)
            .enrichment_type("lead_generation")
            .source("apollo")
            .processed_data(Some(json!({"all_leads": []})))
            .trace_id(Some("t-2".into()))
            .attempts(Some(1), Some(3))
            .build();

        let wire = serde_json::to_string(&envelope).unwrap();
        let parsed: CallbackEnvelope = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, envelope);
        assert!(parsed.is_terminal());
    }

    #[test]
    fn test_pagination_meta_round_trip() {
        let meta = PaginationMeta {
            page: 2,
            total_pages: 3,
            leads_per_page: 20,
            total_leads: 45,
            current_chunk: ChunkCounts {
                qualified_leads: 12,
                structured_leads: 20,
                all_leads: 20,
            },
        };
        let parsed: PaginationMeta =
            serde_json::from_str(&serde_json::to_string(&meta).unwrap()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_task_result_constructors() {
        let ok = TaskResult::completed(Some(json!({"values": [1]})));
        assert_eq!(ok.status, CallbackStatus::Completed);
        assert_eq!(ok.completion_percentage, 100);
        assert!(ok.error.is_none());

        let failed = TaskResult::failed(json!({"kind": "timeout"}));
        assert_eq!(failed.status, CallbackStatus::Failed);
        assert_eq!(failed.error.unwrap()["kind"], "timeout");
    }
}
