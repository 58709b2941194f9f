//! # Thread Offload
//!
//! Sized offload pools for blocking work. Two gates over the runtime's
//! blocking threads: a wide I/O pool (`min(32, cpu · 10)` workers) for
//! blocking sockets and disk, and a narrow CPU pool (`cpu` workers) for
//! compute, so a burst of parsing cannot starve the I/O-bound majority.
//!
//! Every offload captures the caller's trace context and restores it
//! inside the worker before the target function runs. Shutdown drains the
//! CPU pool first, then I/O.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::error::{EnrichError, EnrichResult};
use crate::trace;

/// Which offload pool to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Io,
    Cpu,
}

/// Sized offload pools with trace-context pass-through
#[derive(Debug)]
pub struct OffloadPools {
    io: Arc<Semaphore>,
    cpu: Arc<Semaphore>,
    io_workers: usize,
    cpu_workers: usize,
}

impl OffloadPools {
    /// Size pools from available parallelism
    pub fn new() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_sizes((cpu_count * 10).min(32), cpu_count)
    }

    /// Explicit pool sizes (tests, constrained deployments)
    pub fn with_sizes(io_workers: usize, cpu_workers: usize) -> Self {
        Self {
            io: Arc::new(Semaphore::new(io_workers)),
            cpu: Arc::new(Semaphore::new(cpu_workers)),
            io_workers,
            cpu_workers,
        }
    }

    /// Run a blocking function on the I/O pool
    pub async fn run_io<T, F>(&self, f: F) -> EnrichResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.run(PoolKind::Io, f).await
    }

    /// Run a blocking function on the CPU pool
    pub async fn run_cpu<T, F>(&self, f: F) -> EnrichResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.run(PoolKind::Cpu, f).await
    }

    /// Offload `f` to the selected pool, carrying the trace context across
    /// the thread boundary.
    pub async fn run<T, F>(&self, kind: PoolKind, f: F) -> EnrichResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let semaphore = match kind {
            PoolKind::Io => &self.io,
            PoolKind::Cpu => &self.cpu,
        };
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EnrichError::Cancelled("offload pools shut down".to_string()))?;

        // Capture before the hop, restore inside the worker thread
        let ctx = trace::current();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            trace::sync_scope(ctx, f)
        })
        .await
        .map_err(|e| EnrichError::Internal(format!("offload worker panicked: {e}")))?;

        Ok(result)
    }

    /// Workers available right now in a pool
    pub fn available(&self, kind: PoolKind) -> usize {
        match kind {
            PoolKind::Io => self.io.available_permits(),
            PoolKind::Cpu => self.cpu.available_permits(),
        }
    }

    /// Drain both pools, CPU first. In-flight work completes; subsequent
    /// offloads fail with `Cancelled`.
    pub async fn shutdown(&self) {
        for (semaphore, workers, name) in [
            (&self.cpu, self.cpu_workers, "cpu"),
            (&self.io, self.io_workers, "io"),
        ] {
            // Waiting for every permit back means in-flight work is done
            if let Ok(all) = semaphore.acquire_many(workers as u32).await {
                all.forget();
            }
            semaphore.close();
            info!(pool = name, workers = workers, "Offload pool drained");
        }
    }
}

impl Default for OffloadPools {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceContext;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_io_returns_value() {
        let pools = OffloadPools::with_sizes(2, 1);
        let value = pools.run_io(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_trace_context_crosses_thread_boundary() {
        let pools = OffloadPools::with_sizes(2, 1);
        let ctx = TraceContext {
            trace_id: Some("t-offload".to_string()),
            job_id: Some("j-offload".to_string()),
            ..TraceContext::default()
        };

        let observed = trace::scope(ctx, async {
            pools
                .run_cpu(|| (trace::trace_id(), trace::job_id()))
                .await
                .unwrap()
        })
        .await;

        assert_eq!(observed.0.as_deref(), Some("t-offload"));
        assert_eq!(observed.1.as_deref(), Some("j-offload"));
    }

    #[tokio::test]
    async fn test_pool_sizing_thumb_rules() {
        let pools = OffloadPools::new();
        assert!(pools.io_workers <= 32);
        assert!(pools.cpu_workers >= 1);
        assert!(pools.io_workers >= pools.cpu_workers);
    }

    #[tokio::test]
    async fn test_cpu_pool_bounds_concurrency() {
        let pools = Arc::new(OffloadPools::with_sizes(8, 1));
        assert_eq!(pools.available(PoolKind::Cpu), 1);

        let slow = {
            let pools = pools.clone();
            tokio::spawn(async move {
                pools
                    .run_cpu(|| std::thread::sleep(Duration::from_millis(50)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pools.available(PoolKind::Cpu), 0);
        slow.await.unwrap().unwrap();
        assert_eq!(pools.available(PoolKind::Cpu), 1);
    }

    #[tokio::test]
    async fn test_offload_after_shutdown_is_cancelled() {
        let pools = OffloadPools::with_sizes(1, 1);
        pools.shutdown().await;
        let err = pools.run_io(|| ()).await.unwrap_err();
        assert!(matches!(err, EnrichError::Cancelled(_)));
    }
}
