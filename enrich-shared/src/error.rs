//! # Error Types
//!
//! Unified error taxonomy for the enrichment worker runtime. Every component
//! reports through `EnrichError`; the retry driver consults `is_retryable()`
//! to decide whether an operation is worth another attempt.

use thiserror::Error;

/// Result alias used throughout the workspace
pub type EnrichResult<T> = Result<T, EnrichError>;

/// Comprehensive error types for enrichment operations
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection pool exhausted: {active}/{max} connections in flight")]
    PoolExhausted { active: usize, max: usize },

    #[error("Retryable status {status} from {url}")]
    RetryableStatus { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout waiting for operation: {operation}")]
    Timeout { operation: String },

    #[error("Provider error: {provider} returned {status} - {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Response integrity error: {0}")]
    Integrity(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Durable sink error: {0}")]
    Sink(String),

    #[error("Task queue error: {0}")]
    Queue(String),

    #[error("Circuit breaker open for {component}")]
    CircuitOpen { component: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EnrichError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a retryable-status error from an HTTP response status
    pub fn retryable_status(status: u16, url: impl Into<String>) -> Self {
        Self::RetryableStatus {
            status,
            url: url.into(),
        }
    }

    /// Create a timeout error for a named operation
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a provider error from a non-retryable remote failure
    pub fn provider(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used by `error_details` and job status
    /// records (the wire never carries stack traces or debug formatting).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Auth(_) => "auth",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::RetryableStatus { .. } => "retryable_status",
            Self::Network(_) => "network",
            Self::Timeout { .. } => "timeout",
            Self::Provider { .. } => "provider_unavailable",
            Self::Integrity(_) => "parse",
            Self::Cancelled(_) => "cancelled",
            Self::Sink(_) => "sink",
            Self::Queue(_) => "queue",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Http(_) => "http",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Check whether the error is worth retrying.
    ///
    /// Drives the retry driver: anything returning `false` re-raises
    /// immediately without a backoff sleep.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } => true,
            Self::RetryableStatus { .. } => true,
            Self::Network(_) => true,
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
