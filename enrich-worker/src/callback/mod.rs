//! # Callback Clients
//!
//! Delivery of enrichment results back to the primary application: a
//! single-shot authenticated client and a paginating wrapper that splits
//! oversized terminal payloads into ordered, ID-aligned fragments.

pub mod paginated;

use std::sync::Arc;

use tracing::{debug, error, info};

use enrich_shared::auth::IdTokenProvider;
use enrich_shared::envelope::CallbackEnvelope;
use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::http::ConnectionPool;
use enrich_shared::resilience::{CircuitBreaker, CircuitBreakerConfig};
use enrich_shared::retry::{is_retryable_status, with_retry, RetryPolicy};

pub use paginated::{PaginatedCallbackClient, LEADS_PER_PAGE};

/// Fixed path on the receiver side
pub const CALLBACK_PATH: &str = "/api/v2/internal/enrichment-callback/";

/// Single-shot OIDC-authenticated callback sender.
///
/// Each delivery obtains a token for the receiver's audience (fresh when
/// the cached one expired), POSTs the envelope, and classifies retryable
/// statuses for the retry driver. A circuit breaker fails fast when the
/// receiver has been down across repeated deliveries.
#[derive(Debug)]
pub struct CallbackClient {
    base_url: String,
    audience: String,
    tokens: Arc<IdTokenProvider>,
    pool: Arc<ConnectionPool>,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
}

impl CallbackClient {
    /// `base_url` is the receiver base; the token audience is the base URL
    /// with any trailing slash stripped.
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<IdTokenProvider>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        let base_url = base_url.into();
        let audience = base_url.trim_end_matches('/').to_string();
        Self {
            base_url: audience.clone(),
            audience,
            tokens,
            pool,
            breaker: CircuitBreaker::new("callback", CircuitBreakerConfig::default()),
            policy: RetryPolicy::callback(),
        }
    }

    /// Deliver one envelope. Retries per the callback policy; a 4xx other
    /// than 408/429 is fatal and not retried.
    pub async fn deliver(&self, envelope: &CallbackEnvelope) -> EnrichResult<()> {
        if !self.breaker.should_allow() {
            return Err(EnrichError::CircuitOpen {
                component: "callback".to_string(),
            });
        }

        let url = format!("{}{}", self.base_url, CALLBACK_PATH);
        debug!(
            job_id = %envelope.job_id,
            status = %envelope.status,
            completion = envelope.completion_percentage,
            page = envelope.pagination.as_ref().map(|p| p.page).unwrap_or(1),
            "Sending callback"
        );

        let url_ref: &str = &url;
        let result = with_retry(&self.policy, "send_callback", || async move {
            // Fresh token per attempt; the provider refreshes on expiry
            let token = self.tokens.identity_token(&self.audience).await?;
            let handle = self.pool.acquire()?;

            let response = handle
                .client()
                .post(url_ref)
                .bearer_auth(&token)
                .header("Content-Type", "application/json")
                .json(envelope)
                .send()
                .await?;

            let status = response.status().as_u16();
            if is_retryable_status(status) {
                return Err(EnrichError::retryable_status(status, url_ref));
            }
            if status >= 400 {
                let body = response.text().await.unwrap_or_default();
                return Err(EnrichError::provider("callback", status, body));
            }
            Ok(())
        })
        .await;

        match &result {
            Ok(()) => {
                self.breaker.record_success();
                info!(job_id = %envelope.job_id, status = %envelope.status, "Callback delivered");
            }
            Err(e) => {
                self.breaker.record_failure();
                error!(job_id = %envelope.job_id, error = %e, "Callback delivery failed");
            }
        }
        result
    }

    /// Breaker state, surfaced through health reporting
    pub fn is_healthy(&self) -> bool {
        self.breaker.is_healthy()
    }

    #[cfg(test)]
    pub(crate) fn force_breaker_open(&self) {
        self.breaker.force_open();
    }
}
