//! # Dispatcher Routes
//!
//! The worker's inbound HTTP surface: task creation (enqueue), inline
//! execution, job status, failed-job listing, retry, orchestration
//! trigger, and liveness.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use enrich_shared::envelope::TaskResult;
use enrich_shared::error::EnrichError;
use enrich_shared::job::JobStatus;

use crate::queue::ScheduledTask;
use crate::task::runner::record_scheduled;
use crate::web::error::ApiError;
use crate::web::middleware::trace_requests;
use crate::web::state::AppState;

/// Build the full router for the worker service
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/tasks/create/{task_name}", post(create_task))
        .route("/tasks/failed", get(list_failed_tasks))
        .route("/tasks/{task_name}", post(execute_task))
        .route("/tasks/{job_id}/status", get(get_task_status))
        .route("/tasks/{job_id}/retry", post(retry_task))
        .route("/orchestrations", post(start_orchestration));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health_check))
        .layer(axum::middleware::from_fn(trace_requests))
        .layer(tower_http::timeout::TimeoutLayer::new(
            std::time::Duration::from_secs(300),
        ))
        .with_state(state)
}

/// Create a task: validate + normalize the payload, then enqueue
async fn create_task(
    State(state): State<AppState>,
    Path(task_name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let task = state.registry.get(&task_name)?;
    let payload = task.create_payload(body)?;
    // Record before enqueuing: the in-process queue may start executing
    // immediately
    record_scheduled(state.runner.context(), &payload);
    let scheduled = state.queue.create_task(&task_name, &payload).await?;
    Ok(Json(scheduled))
}

/// Execute a task inline and return the result envelope
async fn execute_task(
    State(state): State<AppState>,
    Path(task_name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<TaskResult>, ApiError> {
    let task = state.registry.get(&task_name)?;
    let payload = task.create_payload(body)?;
    let result = state.runner.run(task, &payload).await;
    Ok(Json(result))
}

/// Detailed status of a specific job
async fn get_task_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    Ok(Json(state.jobs.get(&job_id)?))
}

#[derive(Debug, Deserialize)]
struct FailedTasksQuery {
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    retryable_only: bool,
    limit: Option<usize>,
}

/// List failed jobs inside a date window
async fn list_failed_tasks(
    State(state): State<AppState>,
    Query(query): Query<FailedTasksQuery>,
) -> Result<Json<Vec<JobStatus>>, ApiError> {
    let limit = query.limit.unwrap_or(100);
    if limit == 0 || limit > 1000 {
        return Err(EnrichError::validation("limit must be between 1 and 1000").into());
    }
    let end = query.end_date.unwrap_or_else(Utc::now);
    let start = query
        .start_date
        .unwrap_or_else(|| Utc::now() - ChronoDuration::days(7));

    Ok(Json(
        state.jobs.list_failed(start, end, query.retryable_only, limit),
    ))
}

/// Re-enqueue a failed, retryable job with an incremented attempt number
async fn retry_task(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let status = state.jobs.get(&job_id)?;

    if status.status != enrich_shared::job::JobState::Failed {
        return Err(EnrichError::validation("Only failed tasks can be retried").into());
    }
    if !status.retryable {
        return Err(EnrichError::validation("This task is not retryable").into());
    }
    if status.attempt_number >= status.max_retries {
        return Err(EnrichError::validation("Maximum retry attempts exceeded").into());
    }

    let task = state.registry.get(&status.task_name)?;
    let payload = task.create_payload(json!({
        "account_id": status.entity_id,
        "attempt_number": status.attempt_number + 1,
        "max_retries": status.max_retries,
        "original_job_id": job_id,
    }))?;
    record_scheduled(state.runner.context(), &payload);
    let scheduled = state.queue.create_task(&status.task_name, &payload).await?;
    Ok(Json(scheduled))
}

/// Start a dependency-ordered column generation chain
async fn start_orchestration(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<ScheduledTask>, ApiError> {
    let request: crate::orchestrator::OrchestrationRequest =
        serde_json::from_value(body).map_err(|e| {
            ApiError(EnrichError::validation(format!(
                "invalid orchestration request: {e}"
            )))
        })?;
    let scheduled = state.orchestrator.start(request).await?;
    Ok(Json(scheduled))
}

/// Liveness
async fn health_check() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}
