//! # Connection Pool
//!
//! Bounded acquire/release gate over a shared keep-alive HTTP client.
//! `reqwest` pools connections internally; this wrapper adds the explicit
//! fairness gate the runtime needs: callers acquire a handle before issuing
//! traffic, exhaustion fails fast with a retryable error, and `close()`
//! drops the client so the next acquire reconnects on demand.
//!
//! A single mutex protects the in-flight counter and client lifecycle
//! transitions; HTTP traffic itself runs in parallel on the shared client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{EnrichError, EnrichResult};

/// Connection limits and timeouts for a pool
#[derive(Debug, Clone, PartialEq)]
pub struct PoolLimits {
    /// Maximum concurrent acquisitions before `acquire` fails fast
    pub max_connections: usize,
    /// Keep-alive connections retained per host
    pub max_keepalive: usize,
    /// Idle keep-alive expiry
    pub keepalive_expiry: Duration,
    /// Per-request timeout applied by the underlying client
    pub request_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_connections: 20,
            max_keepalive: 10,
            keepalive_expiry: Duration::from_secs(150),
            request_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    client: Option<reqwest::Client>,
    active: usize,
}

/// Bounded, re-usable HTTP client pool
#[derive(Debug)]
pub struct ConnectionPool {
    limits: PoolLimits,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(limits: PoolLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Acquire a client handle, failing fast when the pool is exhausted.
    ///
    /// The returned handle releases its slot on drop, on every exit path.
    pub fn acquire(self: &Arc<Self>) -> EnrichResult<PoolHandle> {
        let mut state = self.state.lock().expect("pool mutex poisoned");

        if state.active >= self.limits.max_connections {
            warn!(
                active = state.active,
                max = self.limits.max_connections,
                "Connection pool full"
            );
            return Err(EnrichError::PoolExhausted {
                active: state.active,
                max: self.limits.max_connections,
            });
        }

        if state.client.is_none() {
            state.client = Some(self.build_client()?);
        }
        let client = state
            .client
            .clone()
            .expect("client just initialized under lock");

        state.active += 1;
        debug!(active = state.active, "Connection acquired");

        Ok(PoolHandle {
            client,
            pool: Arc::clone(self),
        })
    }

    /// Close the underlying client. Subsequent `acquire` reconnects.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        state.client = None;
        state.active = 0;
    }

    /// Number of currently acquired handles
    pub fn active_connections(&self) -> usize {
        self.state.lock().expect("pool mutex poisoned").active
    }

    /// Configured limits
    pub fn limits(&self) -> &PoolLimits {
        &self.limits
    }

    fn build_client(&self) -> EnrichResult<reqwest::Client> {
        reqwest::Client::builder()
            .pool_max_idle_per_host(self.limits.max_keepalive)
            .pool_idle_timeout(self.limits.keepalive_expiry)
            .timeout(self.limits.request_timeout)
            .build()
            .map_err(|e| EnrichError::Config(format!("failed to build HTTP client: {e}")))
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        // close() may have reset the counter while handles were outstanding
        state.active = state.active.saturating_sub(1);
        debug!(active = state.active, "Connection released");
    }
}

/// Scoped pool acquisition; the slot is released when the handle drops
#[derive(Debug)]
pub struct PoolHandle {
    client: reqwest::Client,
    pool: Arc<ConnectionPool>,
}

impl PoolHandle {
    /// The shared HTTP client behind this acquisition
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(max: usize) -> Arc<ConnectionPool> {
        ConnectionPool::new(PoolLimits {
            max_connections: max,
            ..PoolLimits::default()
        })
    }

    #[test]
    fn test_default_limits() {
        let limits = PoolLimits::default();
        assert_eq!(limits.max_connections, 20);
        assert_eq!(limits.max_keepalive, 10);
        assert_eq!(limits.keepalive_expiry, Duration::from_secs(150));
        assert_eq!(limits.request_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let pool = small_pool(2);
        assert_eq!(pool.active_connections(), 0);

        let h1 = pool.acquire().unwrap();
        assert_eq!(pool.active_connections(), 1);

        drop(h1);
        assert_eq!(pool.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_is_retryable() {
        let pool = small_pool(1);
        let _held = pool.acquire().unwrap();

        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, EnrichError::PoolExhausted { active: 1, max: 1 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_release_frees_slot() {
        let pool = small_pool(1);
        let held = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());
        drop(held);
        assert!(pool.acquire().is_ok());
    }

    #[tokio::test]
    async fn test_close_resets_and_reconnects() {
        let pool = small_pool(2);
        let _h = pool.acquire().unwrap();
        pool.close();
        assert_eq!(pool.active_connections(), 0);

        // Reconnect on demand after close
        let h2 = pool.acquire().unwrap();
        assert_eq!(pool.active_connections(), 1);
        drop(h2);
    }

    #[tokio::test]
    async fn test_release_after_close_saturates() {
        let pool = small_pool(2);
        let h = pool.acquire().unwrap();
        pool.close();
        // Dropping the stale handle must not underflow the counter
        drop(h);
        assert_eq!(pool.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_handles_share_one_client() {
        let pool = small_pool(4);
        let h1 = pool.acquire().unwrap();
        let h2 = pool.acquire().unwrap();
        // reqwest clients are handles to a shared inner pool; both
        // acquisitions see the same underlying client
        let _ = (h1.client(), h2.client());
        assert_eq!(pool.active_connections(), 2);
    }
}
