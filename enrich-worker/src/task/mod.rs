//! # Task Contract
//!
//! The `EnrichmentTask` trait every enrichment implements, the payload
//! envelope the queue delivers, and the progress handle tasks use to
//! stream intermediate callbacks. The runner (`task::runner`) enforces the
//! execution discipline around these pieces.

pub mod runner;
pub mod testing;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use enrich_shared::cache::{AiCache, ResponseCache};
use enrich_shared::config::WorkerConfig;
use enrich_shared::envelope::{CallbackEnvelope, CallbackStatus};
use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::http::ConnectionPool;
use enrich_shared::offload::OffloadPools;
use enrich_shared::retry::RetryPolicy;
use enrich_shared::sink::EnrichmentSink;
use enrich_shared::trace::TraceContext;

use crate::callback::PaginatedCallbackClient;
use crate::jobs::JobStatusStore;
use crate::providers::ProviderAdapter;

fn default_attempt() -> u32 {
    1
}

fn default_max_retries() -> u32 {
    3
}

/// The envelope the queue delivers to `execute`.
///
/// `job_id` is globally unique per logical attempt: a caller-supplied id is
/// honored, otherwise one is generated at payload creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_name: String,
    pub job_id: String,
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    #[serde(default = "default_attempt")]
    pub attempt_number: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_job_id: Option<String>,
    /// Task-specific fields ride alongside the envelope keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskPayload {
    /// Build a payload from a create-request body.
    ///
    /// Validates the required `account_id`, generates `job_id` when the
    /// caller did not supply one, and injects the ambient trace context
    /// (caller-supplied trace fields win).
    pub fn from_request(task_name: &str, body: Value) -> EnrichResult<Self> {
        let injected = enrich_shared::trace::current().inject(&body);
        let mut map = match injected {
            Value::Object(map) => map,
            _ => {
                return Err(EnrichError::validation(
                    "task payload must be a JSON object",
                ))
            }
        };

        map.insert("task_name".into(), Value::String(task_name.to_string()));
        if !map.contains_key("account_id") {
            return Err(EnrichError::validation("account_id is required"));
        }
        if !map.get("job_id").map(Value::is_string).unwrap_or(false) {
            map.insert("job_id".into(), Value::String(Uuid::new_v4().to_string()));
        }

        let payload: TaskPayload = serde_json::from_value(Value::Object(map))?;
        if payload.max_retries == 0 {
            return Err(EnrichError::validation("max_retries must be at least 1"));
        }
        Ok(payload)
    }

    /// Trace context carried by this payload
    pub fn trace_context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id.clone(),
            job_id: Some(self.job_id.clone()),
            account_id: Some(self.account_id.clone()),
            lead_id: self.lead_id.clone(),
            task_name: Some(self.task_name.clone()),
        }
    }

    /// Typed access to a task-specific field
    pub fn extra_field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// What a task execution produced
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    pub raw_data: Option<Value>,
    pub processed_data: Option<Value>,
    /// Per-entity failures that did not fail the job
    pub partial_errors: Vec<Value>,
    /// Chain state echoed into the terminal envelope
    pub orchestration_data: Option<Value>,
}

impl TaskOutput {
    pub fn processed(processed_data: Value) -> Self {
        Self {
            processed_data: Some(processed_data),
            ..Self::default()
        }
    }
}

/// Shared services a task executes against
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub config: Arc<WorkerConfig>,
    pub pool: Arc<ConnectionPool>,
    pub response_cache: Arc<ResponseCache>,
    pub ai_cache: Arc<AiCache>,
    pub sink: Arc<EnrichmentSink>,
    pub offload: Arc<OffloadPools>,
    pub callbacks: Arc<PaginatedCallbackClient>,
    pub jobs: Arc<JobStatusStore>,
}

impl TaskContext {
    /// Provider adapter composing cache → pool → retry for one remote
    pub fn adapter(&self, provider: &'static str) -> ProviderAdapter {
        ProviderAdapter::new(
            provider,
            self.pool.clone(),
            self.response_cache.clone(),
            RetryPolicy::provider(),
        )
    }
}

/// Streams monotonic progress callbacks for one execution.
///
/// The emitted `completion_percentage` never decreases: a stage reporting
/// less than an earlier stage is clamped up.
#[derive(Debug)]
pub struct ProgressHandle {
    client: Arc<PaginatedCallbackClient>,
    template: CallbackEnvelope,
    highest: AtomicU8,
}

impl ProgressHandle {
    pub fn new(client: Arc<PaginatedCallbackClient>, template: CallbackEnvelope) -> Self {
        Self {
            client,
            template,
            highest: AtomicU8::new(0),
        }
    }

    /// Emit a progress callback at `percentage` (clamped monotonic, < 100)
    pub async fn progress(
        &self,
        percentage: u8,
        processed_data: Option<Value>,
    ) -> EnrichResult<()> {
        let pct = percentage.min(99).max(self.highest.load(Ordering::Acquire));
        self.highest.store(pct, Ordering::Release);

        let mut envelope = self.template.clone();
        envelope.status = CallbackStatus::Processing;
        envelope.completion_percentage = pct;
        envelope.processed_data = processed_data;
        self.client.send(envelope).await
    }

    /// Highest percentage emitted so far
    pub fn highest(&self) -> u8 {
        self.highest.load(Ordering::Acquire)
    }
}

/// One enrichment implementation.
///
/// `create_payload` validates and normalizes a create-request body into
/// the queue envelope; `execute` runs the pipeline, emitting progress
/// through the handle. Initial and terminal callbacks are the runner's
/// responsibility, not the task's.
#[async_trait]
pub trait EnrichmentTask: Send + Sync + std::fmt::Debug {
    /// Unique registry name
    fn name(&self) -> &str;

    /// Enrichment type reported in callbacks
    fn enrichment_type(&self) -> &str;

    /// Source label reported in callbacks
    fn source(&self) -> &str {
        "internal"
    }

    /// Wall-clock budget for one execution
    fn timeout(&self) -> Duration {
        Duration::from_secs(600)
    }

    /// Validate and normalize a create-request body
    fn create_payload(&self, body: Value) -> EnrichResult<TaskPayload> {
        TaskPayload::from_request(self.name(), body)
    }

    /// Run the enrichment pipeline
    async fn execute(
        &self,
        ctx: &TaskContext,
        payload: &TaskPayload,
        progress: &ProgressHandle,
    ) -> EnrichResult<TaskOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_requires_account_id() {
        let err = TaskPayload::from_request("task_a", json!({"job_id": "j-1"})).unwrap_err();
        assert!(matches!(err, EnrichError::Validation(_)));
    }

    #[test]
    fn test_payload_generates_job_id_when_absent() {
        let payload = TaskPayload::from_request("task_a", json!({"account_id": "A1"})).unwrap();
        assert!(!payload.job_id.is_empty());
        assert_eq!(payload.task_name, "task_a");
        assert_eq!(payload.attempt_number, 1);
        assert_eq!(payload.max_retries, 3);
    }

    #[test]
    fn test_payload_honors_caller_job_id() {
        let payload =
            TaskPayload::from_request("task_a", json!({"account_id": "A1", "job_id": "J1"}))
                .unwrap();
        assert_eq!(payload.job_id, "J1");
    }

    #[test]
    fn test_payload_rejects_non_object_body() {
        assert!(TaskPayload::from_request("task_a", json!([1, 2])).is_err());
    }

    #[test]
    fn test_payload_rejects_zero_max_retries() {
        let err = TaskPayload::from_request(
            "task_a",
            json!({"account_id": "A1", "max_retries": 0}),
        )
        .unwrap_err();
        assert!(matches!(err, EnrichError::Validation(_)));
    }

    #[test]
    fn test_extra_fields_round_trip() {
        let payload = TaskPayload::from_request(
            "task_a",
            json!({"account_id": "A1", "website_url": "https://acme.example"}),
        )
        .unwrap();
        assert_eq!(
            payload.extra_field("website_url").and_then(Value::as_str),
            Some("https://acme.example")
        );

        let round_tripped: TaskPayload =
            serde_json::from_value(payload.to_value()).unwrap();
        assert_eq!(round_tripped, payload);
    }

    #[tokio::test]
    async fn test_ambient_trace_injected_with_caller_precedence() {
        let ambient = TraceContext {
            trace_id: Some("ambient-t".into()),
            ..TraceContext::default()
        };
        enrich_shared::trace::scope(ambient, async {
            let inherited =
                TaskPayload::from_request("task_a", json!({"account_id": "A1"})).unwrap();
            assert_eq!(inherited.trace_id.as_deref(), Some("ambient-t"));

            let explicit = TaskPayload::from_request(
                "task_a",
                json!({"account_id": "A1", "trace_id": "caller-t"}),
            )
            .unwrap();
            assert_eq!(explicit.trace_id.as_deref(), Some("caller-t"));
        })
        .await;
    }

    #[test]
    fn test_trace_context_from_payload() {
        let payload = TaskPayload::from_request(
            "task_a",
            json!({"account_id": "A1", "job_id": "J1", "trace_id": "T1", "lead_id": "L1"}),
        )
        .unwrap();
        let ctx = payload.trace_context();
        assert_eq!(ctx.trace_id.as_deref(), Some("T1"));
        assert_eq!(ctx.job_id.as_deref(), Some("J1"));
        assert_eq!(ctx.account_id.as_deref(), Some("A1"));
        assert_eq!(ctx.lead_id.as_deref(), Some("L1"));
        assert_eq!(ctx.task_name.as_deref(), Some("task_a"));
    }
}
