//! # Application State
//!
//! Bootstrap wiring for the worker service: shared substrate (pool,
//! caches, sink, offload, tokens), callback clients, queue, orchestrator,
//! runner, registry, and the built-in task set. Local environments get the
//! in-process queue, the in-memory sink, and a fixed dev token; everything
//! else runs against the real providers.

use std::sync::Arc;

use tracing::info;

use enrich_shared::auth::IdTokenProvider;
use enrich_shared::cache::{AiCache, ResponseCache};
use enrich_shared::config::WorkerConfig;
use enrich_shared::error::EnrichResult;
use enrich_shared::http::{ConnectionPool, PoolLimits};
use enrich_shared::offload::OffloadPools;
use enrich_shared::sink::EnrichmentSink;

use crate::callback::{CallbackClient, PaginatedCallbackClient};
use crate::jobs::JobStatusStore;
use crate::orchestrator::ColumnOrchestrator;
use crate::queue::TaskQueue;
use crate::registry::TaskRegistry;
use crate::task::runner::TaskRunner;
use crate::task::TaskContext;
use crate::tasks::register_tasks;

/// Shared service state behind the dispatcher routes
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<WorkerConfig>,
    pub registry: Arc<TaskRegistry>,
    pub queue: Arc<TaskQueue>,
    pub jobs: Arc<JobStatusStore>,
    pub runner: Arc<TaskRunner>,
    pub orchestrator: Arc<ColumnOrchestrator>,
    pub offload: Arc<OffloadPools>,
}

impl AppState {
    /// Wire the full service graph from configuration
    pub async fn bootstrap(config: WorkerConfig) -> EnrichResult<Self> {
        let config = Arc::new(config);

        let tokens = Arc::new(if config.is_local() {
            // Local runs talk to local receivers; no real credentials
            IdTokenProvider::static_token("local-dev-token")
        } else {
            IdTokenProvider::from_credentials_path(
                config.google_application_credentials.as_deref(),
            )?
        });

        let sink = Arc::new(if config.is_local() {
            EnrichmentSink::new_in_memory()
        } else {
            EnrichmentSink::new_bigquery(
                config.google_cloud_project.clone(),
                config.bigquery_dataset.clone(),
                tokens.clone(),
            )
        });

        let pool = ConnectionPool::new(PoolLimits::default());
        let response_cache = Arc::new(ResponseCache::new(sink.clone()));
        let ai_cache = Arc::new(AiCache::new(sink.clone()));
        let offload = Arc::new(OffloadPools::new());
        let jobs = Arc::new(JobStatusStore::new());

        let callbacks = Arc::new(PaginatedCallbackClient::new(Arc::new(CallbackClient::new(
            config.django_base_url.clone(),
            tokens.clone(),
            pool.clone(),
        ))));

        let registry = Arc::new(TaskRegistry::new());
        register_tasks(&registry)?;

        let queue = Arc::new(TaskQueue::from_config(
            config.clone(),
            tokens,
            registry.clone(),
        ));
        let orchestrator = Arc::new(ColumnOrchestrator::new(queue.clone()));

        let runner = Arc::new(TaskRunner::new(TaskContext {
            config: config.clone(),
            pool,
            response_cache,
            ai_cache,
            sink: sink.clone(),
            offload: offload.clone(),
            callbacks,
            jobs: jobs.clone(),
        }));
        runner.bind_orchestrator(orchestrator.clone());
        queue.bind_runner(runner.clone());

        spawn_cache_cleanup(runner.context().response_cache.clone(), runner.context().ai_cache.clone());

        info!(
            environment = %config.environment,
            queue = queue.provider_name(),
            sink = sink.provider_name(),
            tasks = registry.list().len(),
            "Worker state bootstrapped"
        );

        Ok(Self {
            config,
            registry,
            queue,
            jobs,
            runner,
            orchestrator,
            offload,
        })
    }
}

/// Periodic cleanup of expired and stale cache rows
fn spawn_cache_cleanup(
    response_cache: Arc<ResponseCache>,
    ai_cache: Arc<AiCache>,
) {
    const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(6 * 60 * 60);
    const MAX_AGE_DAYS: i64 = 30;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match response_cache.clear_expired(MAX_AGE_DAYS).await {
                Ok(removed) => info!(removed = removed, "Response cache cleanup complete"),
                Err(e) => tracing::warn!(error = %e, "Response cache cleanup failed"),
            }
            match ai_cache.clear_expired(MAX_AGE_DAYS).await {
                Ok(removed) => info!(removed = removed, "AI cache cleanup complete"),
                Err(e) => tracing::warn!(error = %e, "AI cache cleanup failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing;

    #[tokio::test]
    async fn test_bootstrap_local_wiring() {
        let state = AppState::bootstrap(testing::local_config("http://127.0.0.1:9"))
            .await
            .unwrap();
        assert_eq!(state.queue.provider_name(), "in_process");
        assert_eq!(
            state.registry.list(),
            vec!["account_enrichment", "column_generation", "lead_generation"]
        );
        assert!(state.jobs.is_empty());
    }
}
