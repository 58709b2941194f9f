//! Test support: trivial task implementations and a fully in-memory
//! service context wired to a receiver URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use enrich_shared::auth::IdTokenProvider;
use enrich_shared::cache::{AiCache, ResponseCache};
use enrich_shared::config::WorkerConfig;
use enrich_shared::error::EnrichResult;
use enrich_shared::http::{ConnectionPool, PoolLimits};
use enrich_shared::offload::OffloadPools;
use enrich_shared::sink::EnrichmentSink;

use crate::callback::{CallbackClient, PaginatedCallbackClient};
use crate::jobs::JobStatusStore;
use crate::task::{
    EnrichmentTask, ProgressHandle, TaskContext, TaskOutput, TaskPayload,
};

/// Task that succeeds immediately with empty processed data
#[derive(Debug)]
pub struct NoopTask {
    name: String,
}

impl NoopTask {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl EnrichmentTask for NoopTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn enrichment_type(&self) -> &str {
        "noop"
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        _payload: &TaskPayload,
        _progress: &ProgressHandle,
    ) -> EnrichResult<TaskOutput> {
        Ok(TaskOutput::processed(json!({})))
    }
}

/// Local-mode configuration pointed at a test receiver
pub fn local_config(receiver_base: &str) -> WorkerConfig {
    serde_json::from_value(json!({
        "environment": "local",
        "worker_base_url": "http://127.0.0.1:8080",
        "django_base_url": receiver_base,
        "google_cloud_project": "test-project",
    }))
    .expect("local test config is valid")
}

/// Fully in-memory task context delivering callbacks to `receiver_base`
pub fn test_context(receiver_base: &str) -> TaskContext {
    test_context_with_config(Arc::new(local_config(receiver_base)))
}

/// As [`test_context`] but with an explicit config
pub fn test_context_with_config(config: Arc<WorkerConfig>) -> TaskContext {
    let sink = Arc::new(EnrichmentSink::new_in_memory());
    let pool = ConnectionPool::new(PoolLimits {
        request_timeout: Duration::from_secs(10),
        ..PoolLimits::default()
    });
    let tokens = Arc::new(IdTokenProvider::static_token("test-token"));
    let callbacks = Arc::new(PaginatedCallbackClient::new(Arc::new(CallbackClient::new(
        config.django_base_url.clone(),
        tokens,
        pool.clone(),
    ))));

    TaskContext {
        config,
        pool,
        response_cache: Arc::new(ResponseCache::new(sink.clone())),
        ai_cache: Arc::new(AiCache::new(sink.clone())),
        sink,
        offload: Arc::new(OffloadPools::with_sizes(4, 2)),
        callbacks,
        jobs: Arc::new(JobStatusStore::new()),
    }
}

/// Spawn a callback receiver capturing delivered envelopes.
///
/// Returns the receiver base URL and a channel yielding envelopes in
/// delivery order.
pub async fn spawn_receiver() -> (
    String,
    tokio::sync::mpsc::UnboundedReceiver<enrich_shared::envelope::CallbackEnvelope>,
) {
    use axum::{routing::post, Json, Router};

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let app = Router::new().route(
        "/api/v2/internal/enrichment-callback/",
        post(
            move |Json(envelope): Json<enrich_shared::envelope::CallbackEnvelope>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(envelope);
                    Json(json!({"status": "received"}))
                }
            },
        ),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test receiver");
    let addr = listener.local_addr().expect("receiver address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test receiver");
    });
    (format!("http://{addr}"), rx)
}

/// Payload for `task_name` against a fixed account/job
pub fn payload_for(task_name: &str, job_id: &str) -> TaskPayload {
    TaskPayload::from_request(
        task_name,
        json!({"account_id": "acct-test", "job_id": job_id}),
    )
    .expect("test payload is valid")
}

/// Convenience wrapper for task-specific payload fields
pub fn payload_with(task_name: &str, job_id: &str, fields: Value) -> TaskPayload {
    let mut body = fields;
    body["account_id"] = json!("acct-test");
    body["job_id"] = json!(job_id);
    TaskPayload::from_request(task_name, body).expect("test payload is valid")
}
