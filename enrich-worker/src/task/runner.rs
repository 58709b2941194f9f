//! # Task Runner
//!
//! Enforces the execution discipline around every task: restore the trace
//! context from the payload, emit the initial callback before any provider
//! call, run the pipeline under its wall-clock budget, emit exactly one
//! terminal callback (even on panic or timeout), persist raw and processed
//! copies to the durable sink, and feed terminal envelopes to the
//! dependency orchestrator.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{error, info, warn, Instrument};

use enrich_shared::envelope::{CallbackEnvelope, CallbackStatus, TaskResult};
use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::job::JobStatus;
use enrich_shared::sink::EnrichmentRecord;
use enrich_shared::trace;

use crate::orchestrator::ColumnOrchestrator;
use crate::task::{EnrichmentTask, ProgressHandle, TaskContext, TaskOutput, TaskPayload};

/// Runs tasks under the standard lifecycle
#[derive(Debug)]
pub struct TaskRunner {
    ctx: TaskContext,
    orchestrator: OnceLock<Arc<ColumnOrchestrator>>,
}

impl TaskRunner {
    pub fn new(ctx: TaskContext) -> Self {
        Self {
            ctx,
            orchestrator: OnceLock::new(),
        }
    }

    /// Late-bind the orchestrator (it holds the queue, which holds this
    /// runner in local mode).
    pub fn bind_orchestrator(&self, orchestrator: Arc<ColumnOrchestrator>) {
        let _ = self.orchestrator.set(orchestrator);
    }

    /// Services tasks execute against
    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Execute one task under the lifecycle discipline. The returned
    /// summary mirrors the terminal callback.
    pub fn run<'a>(
        &'a self,
        task: Arc<dyn EnrichmentTask>,
        payload: &'a TaskPayload,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>> {
        // Payload trace fields win over whatever scope the caller was in;
        // boxed to break the recursive type cycle through the in-process
        // queue (run -> notify_orchestrator -> queue.create_task -> spawn
        // of an async block that calls run again).
        Box::pin(async move {
            let trace_ctx = trace::current().merged_with(&payload.trace_context());
            let span = trace_ctx.span("task_execution");
            trace::scope(trace_ctx, self.run_scoped(task, payload))
                .instrument(span)
                .await
        })
    }

    async fn run_scoped(
        &self,
        task: Arc<dyn EnrichmentTask>,
        payload: &TaskPayload,
    ) -> TaskResult {
        info!(
            task_name = %payload.task_name,
            job_id = %payload.job_id,
            account_id = %payload.account_id,
            attempt = payload.attempt_number,
            "Task execution started"
        );

        self.ctx.jobs.mark_processing(
            &payload.job_id,
            &payload.task_name,
            &payload.account_id,
            payload.attempt_number,
            payload.max_retries,
        );

        let template = CallbackEnvelope::builder(&payload.job_id, &payload.account_id)
            .enrichment_type(task.enrichment_type())
            .source(task.source())
            .lead_id(payload.lead_id.clone())
            .attempts(Some(payload.attempt_number), Some(payload.max_retries))
            .trace_id(trace::trace_id())
            .build();

        // Initial callback before any provider call
        let mut initial = template.clone();
        initial.status = CallbackStatus::Processing;
        initial.completion_percentage = 0;
        if let Err(e) = self.ctx.callbacks.send(initial).await {
            warn!(job_id = %payload.job_id, error = %e, "Initial callback failed, continuing");
        }

        let progress = ProgressHandle::new(self.ctx.callbacks.clone(), template.clone());

        let outcome = std::panic::AssertUnwindSafe(tokio::time::timeout(
            task.timeout(),
            task.execute(&self.ctx, payload, &progress),
        ))
        .catch_unwind()
        .await;

        let outcome: EnrichResult<TaskOutput> = match outcome {
            Err(panic) => Err(EnrichError::Internal(format!(
                "task panicked: {}",
                panic_message(&panic)
            ))),
            Ok(Err(_elapsed)) => Err(EnrichError::timeout(payload.task_name.clone())),
            Ok(Ok(result)) => result,
        };

        match outcome {
            Ok(output) => self.finish_completed(&task, payload, template, output).await,
            Err(e) => self.finish_failed(payload, template, e).await,
        }
    }

    async fn finish_completed(
        &self,
        task: &Arc<dyn EnrichmentTask>,
        payload: &TaskPayload,
        template: CallbackEnvelope,
        output: TaskOutput,
    ) -> TaskResult {
        let error_details = if output.partial_errors.is_empty() {
            None
        } else {
            Some(json!({"partial": output.partial_errors}))
        };

        let mut terminal = template;
        terminal.status = CallbackStatus::Completed;
        terminal.completion_percentage = 100;
        terminal.raw_data = output.raw_data.clone();
        terminal.processed_data = output.processed_data.clone();
        terminal.error_details = error_details.clone();
        terminal.orchestration_data = output.orchestration_data.clone();

        let delivery = self.ctx.callbacks.send(terminal.clone()).await;

        self.persist(payload, task.source(), &terminal, "completed").await;

        if let Err(e) = delivery {
            // The work finished but the receiver never heard about it;
            // surface that through the status API instead of lying.
            error!(job_id = %payload.job_id, error = %e, "Terminal callback undeliverable");
            self.ctx.jobs.mark_failed(&payload.job_id, &e);
        } else {
            self.ctx.jobs.mark_completed(&payload.job_id);
        }

        self.notify_orchestrator(&terminal).await;

        info!(
            job_id = %payload.job_id,
            partial_failures = terminal
                .error_details
                .as_ref()
                .and_then(|d| d["partial"].as_array().map(Vec::len))
                .unwrap_or(0),
            "Task execution completed"
        );
        TaskResult {
            status: CallbackStatus::Completed,
            completion_percentage: 100,
            processed_data: output.processed_data,
            error: error_details,
        }
    }

    async fn finish_failed(
        &self,
        payload: &TaskPayload,
        template: CallbackEnvelope,
        e: EnrichError,
    ) -> TaskResult {
        error!(
            job_id = %payload.job_id,
            kind = e.kind(),
            error = %e,
            "Task execution failed"
        );
        let error_details = json!({"kind": e.kind(), "message": e.to_string()});

        let mut terminal = template;
        terminal.status = CallbackStatus::Failed;
        terminal.completion_percentage = 100;
        terminal.error_details = Some(error_details.clone());
        terminal.orchestration_data = payload
            .extra_field("orchestration_data")
            .cloned();

        if let Err(delivery) = self.ctx.callbacks.send(terminal.clone()).await {
            error!(job_id = %payload.job_id, error = %delivery, "Failed-terminal callback undeliverable");
        }

        self.persist(payload, "internal", &terminal, "failed").await;
        self.ctx.jobs.mark_failed(&payload.job_id, &e);
        self.notify_orchestrator(&terminal).await;

        TaskResult {
            status: CallbackStatus::Failed,
            completion_percentage: 100,
            processed_data: None,
            error: Some(error_details),
        }
    }

    async fn persist(
        &self,
        payload: &TaskPayload,
        source: &str,
        terminal: &CallbackEnvelope,
        status: &str,
    ) {
        let record = EnrichmentRecord {
            job_id: payload.job_id.clone(),
            tenant_id: payload.tenant_id.clone(),
            status: status.to_string(),
            entity_type: if payload.lead_id.is_some() {
                "lead".to_string()
            } else {
                "account".to_string()
            },
            entity_id: payload
                .lead_id
                .clone()
                .unwrap_or_else(|| payload.account_id.clone()),
            source: source.to_string(),
            raw_data: terminal.raw_data.clone().unwrap_or(Value::Null),
            processed_data: terminal.processed_data.clone().unwrap_or(Value::Null),
            error_details: terminal.error_details.clone(),
        };
        if let Err(e) = self.ctx.sink.insert_enrichment_record(record).await {
            warn!(job_id = %payload.job_id, error = %e, "Failed to persist enrichment record");
        }
    }

    async fn notify_orchestrator(&self, terminal: &CallbackEnvelope) {
        if let Some(orchestrator) = self.orchestrator.get() {
            orchestrator.observe_terminal(terminal).await;
        }
    }
}

/// Record a freshly scheduled job for the create path
pub fn record_scheduled(ctx: &TaskContext, payload: &TaskPayload) {
    ctx.jobs.create(JobStatus::scheduled(
        &payload.job_id,
        &payload.task_name,
        &payload.account_id,
        payload.attempt_number,
        payload.max_retries,
    ));
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
