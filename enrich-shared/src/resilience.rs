//! # Circuit Breaker
//!
//! Fault isolation for outbound channels (callback delivery, durable sink).
//! Standard three-state machine:
//!
//! - **Closed**: normal operation, all calls pass through
//! - **Open**: too many consecutive failures, calls fail fast
//! - **Half-Open**: recovery timeout elapsed, a limited probe is allowed;
//!   `success_threshold` consecutive successes close the circuit again
//!
//! State lives in atomics so recording is lock-free on the hot path; only
//! the open-transition timestamp sits behind a mutex.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Circuit state for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Invalid values default to Open (safest)
            _ => CircuitState::Open,
        }
    }
}

impl CircuitState {
    fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Thresholds and recovery timing
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub timeout: Duration,
    /// Consecutive half-open successes required to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Metrics snapshot for observability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
}

/// Three-state circuit breaker protecting one named component
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// Component name this breaker protects
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether the next call is allowed.
    ///
    /// Open circuits transition to half-open once the recovery timeout has
    /// elapsed, allowing a probe through.
    pub fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .expect("breaker mutex poisoned")
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    self.transition(CircuitState::HalfOpen);
                    self.half_open_successes.store(0, Ordering::Release);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);

        if self.state() == CircuitState::HalfOpen {
            let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
            if successes >= self.config.success_threshold {
                info!(component = %self.name, "Circuit breaker recovered, closing");
                self.transition(CircuitState::Closed);
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match self.state() {
            // A half-open probe failing reopens immediately
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                warn!(
                    component = %self.name,
                    failures = failures,
                    "Failure threshold reached, opening circuit"
                );
                self.open();
            }
            _ => {}
        }
    }

    /// Healthy = not open
    pub fn is_healthy(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Force the circuit to open state (emergency kill switch)
    pub fn force_open(&self) {
        self.open();
    }

    /// Force the circuit to closed state (emergency recovery)
    pub fn force_closed(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.transition(CircuitState::Closed);
    }

    /// Metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
        }
    }

    fn open(&self) {
        *self.opened_at.lock().expect("breaker mutex poisoned") = Some(Instant::now());
        self.transition(CircuitState::Open);
    }

    fn transition(&self, to: CircuitState) {
        self.state.store(to.as_u8(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, timeout: Duration, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: failures,
                timeout,
                success_threshold: successes,
            },
        )
    }

    #[test]
    fn test_starts_closed() {
        let cb = breaker(3, Duration::from_secs(5), 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.should_allow());
        assert!(cb.is_healthy());
    }

    #[test]
    fn test_opens_at_exact_threshold() {
        let cb = breaker(3, Duration::from_secs(5), 2);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow());
        assert!(!cb.is_healthy());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(5), 2);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.metrics().consecutive_failures, 0);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_recovery() {
        let cb = breaker(2, Duration::ZERO, 2);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Zero timeout: first allow check transitions to half-open
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(2, Duration::ZERO, 2);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.should_allow()); // half-open
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_blocks_until_timeout() {
        let cb = breaker(1, Duration::from_secs(60), 1);
        cb.record_failure();
        assert!(!cb.should_allow());
        assert!(!cb.should_allow());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_force_operations() {
        let cb = breaker(5, Duration::from_secs(30), 2);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[test]
    fn test_metrics_counts() {
        let cb = breaker(10, Duration::from_secs(30), 2);
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        let metrics = cb.metrics();
        assert_eq!(metrics.success_count, 2);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.consecutive_failures, 1);
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(CircuitState::from(0), CircuitState::Closed);
        assert_eq!(CircuitState::from(1), CircuitState::Open);
        assert_eq!(CircuitState::from(2), CircuitState::HalfOpen);
        assert_eq!(CircuitState::from(255), CircuitState::Open);
    }
}
