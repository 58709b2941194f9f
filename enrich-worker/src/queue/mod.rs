//! # Task Queue
//!
//! Delayed dispatch of task payloads back to the worker's execute
//! endpoint. Enum dispatch over two providers: Google Cloud Tasks in
//! deployments, and an in-process mock (`ENVIRONMENT=local`) that records
//! the task and executes it on a spawned, trace-preserving tokio task.
//!
//! The `task_id` returned to callers is the queue's task name, which is
//! deliberately distinct from the logical `job_id` inside the payload.

use std::sync::{Arc, OnceLock};

use base64::Engine;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use enrich_shared::auth::IdTokenProvider;
use enrich_shared::config::WorkerConfig;
use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::trace;

use crate::registry::TaskRegistry;
use crate::task::runner::TaskRunner;
use crate::task::TaskPayload;

const CLOUD_TASKS_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Create-path response: the queue's task identity, not the job's
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub status: String,
    pub task_name: String,
    pub task_id: String,
}

/// Queue provider
#[derive(Debug)]
pub enum TaskQueue {
    CloudTasks(CloudTasksQueue),
    InProcess(InProcessQueue),
}

impl TaskQueue {
    /// Provider selection: the in-process mock in local environments,
    /// Cloud Tasks everywhere else.
    pub fn from_config(
        config: Arc<WorkerConfig>,
        tokens: Arc<IdTokenProvider>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        if config.is_local() {
            Self::InProcess(InProcessQueue::new(registry))
        } else {
            Self::CloudTasks(CloudTasksQueue::new(config, tokens))
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::CloudTasks(_) => "cloud_tasks",
            Self::InProcess(_) => "in_process",
        }
    }

    /// Enqueue a payload for later execution against
    /// `/api/v1/tasks/{task_name}`.
    pub async fn create_task(
        &self,
        task_name: &str,
        payload: &TaskPayload,
    ) -> EnrichResult<ScheduledTask> {
        match self {
            Self::CloudTasks(queue) => queue.create_task(task_name, payload).await,
            Self::InProcess(queue) => queue.create_task(task_name, payload).await,
        }
    }

    /// Late-bind the runner the in-process provider executes against
    /// (no-op for Cloud Tasks).
    pub fn bind_runner(&self, runner: Arc<TaskRunner>) {
        if let Self::InProcess(queue) = self {
            queue.bind_runner(runner);
        }
    }
}

// =============================================================================
// Cloud Tasks provider
// =============================================================================

/// Cloud Tasks REST client (`projects.locations.queues.tasks.create`)
#[derive(Debug)]
pub struct CloudTasksQueue {
    http: reqwest::Client,
    config: Arc<WorkerConfig>,
    tokens: Arc<IdTokenProvider>,
    api_base: String,
}

impl CloudTasksQueue {
    pub fn new(config: Arc<WorkerConfig>, tokens: Arc<IdTokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            tokens,
            api_base: "https://cloudtasks.googleapis.com/v2".to_string(),
        }
    }

    /// Point at a different endpoint (tests)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn create_task(
        &self,
        task_name: &str,
        payload: &TaskPayload,
    ) -> EnrichResult<ScheduledTask> {
        let parent = self.config.queue_path();
        let url = format!("{}/{parent}/tasks", self.api_base);
        let target = format!("{}/api/v1/tasks/{task_name}", self.config.worker_base_url);

        let body_bytes = serde_json::to_vec(payload)?;
        let task = json!({
            "task": {
                "httpRequest": {
                    "httpMethod": "POST",
                    "url": target,
                    "headers": {"Content-Type": "application/json"},
                    "body": base64::engine::general_purpose::STANDARD.encode(body_bytes),
                    "oidcToken": {
                        "serviceAccountEmail": self.config.cloud_tasks_service_account_email,
                        "audience": self.config.worker_base_url,
                    },
                },
            },
        });

        let token = self.tokens.access_token(CLOUD_TASKS_SCOPE).await?;
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&task)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Queue(format!(
                "tasks.create returned {status}: {body}"
            )));
        }

        let created: serde_json::Value = response.json().await?;
        let task_id = created
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| EnrichError::Queue("tasks.create response missing name".to_string()))?
            .to_string();

        info!(
            task_name = task_name,
            job_id = %payload.job_id,
            task_id = %task_id,
            "Task scheduled on Cloud Tasks"
        );
        Ok(ScheduledTask {
            status: "scheduled".to_string(),
            task_name: task_name.to_string(),
            task_id,
        })
    }
}

// =============================================================================
// In-process provider (local development)
// =============================================================================

/// Records created tasks and executes them on a spawned task
#[derive(Debug, Default)]
pub struct InProcessQueue {
    tasks: DashMap<String, serde_json::Value>,
    registry: Arc<TaskRegistry>,
    runner: OnceLock<Arc<TaskRunner>>,
}

impl InProcessQueue {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            tasks: DashMap::new(),
            registry,
            runner: OnceLock::new(),
        }
    }

    pub fn bind_runner(&self, runner: Arc<TaskRunner>) {
        let _ = self.runner.set(runner);
    }

    async fn create_task(
        &self,
        task_name: &str,
        payload: &TaskPayload,
    ) -> EnrichResult<ScheduledTask> {
        let task_id = Uuid::new_v4().to_string();
        self.tasks.insert(
            task_id.clone(),
            json!({
                "task_name": task_name,
                "payload": payload.to_value(),
                "status": "scheduled",
            }),
        );

        let Some(runner) = self.runner.get().cloned() else {
            return Err(EnrichError::Queue(
                "in-process queue has no bound runner".to_string(),
            ));
        };
        let task = self.registry.get(task_name)?;
        let payload = payload.clone();
        let record_id = task_id.clone();

        info!(task_id = %task_id, task_name = task_name, "Executing task in-process");
        trace::spawn_traced(async move {
            let result = runner.run(task, &payload).await;
            info!(
                task_id = %record_id,
                status = %result.status,
                "In-process task execution finished"
            );
        });

        Ok(ScheduledTask {
            status: "scheduled".to_string(),
            task_name: task_name.to_string(),
            task_id,
        })
    }

    /// Recorded tasks, for assertions
    pub fn recorded(&self) -> Vec<serde_json::Value> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }
}
