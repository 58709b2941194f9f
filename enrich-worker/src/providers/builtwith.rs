//! # BuiltWith Adapter
//!
//! Technology-profile lookups for a company domain. Responses change
//! slowly, so they cache for a week by default.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use enrich_shared::error::{EnrichError, EnrichResult};

use super::{ProviderAdapter, RequestSpec};

const DEFAULT_BASE_URL: &str = "https://api.builtwith.com/v21/api.json";
const PROFILE_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// BuiltWith technology profile client
#[derive(Debug)]
pub struct BuiltWithClient {
    adapter: Arc<ProviderAdapter>,
    api_key: SecretString,
    base_url: String,
}

impl BuiltWithClient {
    pub fn new(adapter: Arc<ProviderAdapter>, api_key: SecretString) -> Self {
        Self {
            adapter,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point at a different endpoint (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch the technology profile for a domain
    pub async fn domain_profile(
        &self,
        domain: &str,
        tenant_id: Option<String>,
    ) -> EnrichResult<Value> {
        let spec = RequestSpec::get(&self.base_url)
            // The key rides as a header so the cache fingerprint stays
            // independent of it
            .header("x-api-key", self.api_key.expose_secret())
            .params(json!({"LOOKUP": domain, "NOMETA": "yes"}))
            .tenant(tenant_id)
            .cache_ttl(Some(PROFILE_CACHE_TTL));

        let (data, _status) = self.adapter.request(spec).await?;

        // BuiltWith reports domain-level problems inside a 200 body
        if let Some(errors) = data.get("Errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(EnrichError::provider(
                    "builtwith",
                    200,
                    errors[0]
                        .get("Message")
                        .and_then(Value::as_str)
                        .unwrap_or("lookup failed")
                        .to_string(),
                ));
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_shared::cache::ResponseCache;
    use enrich_shared::http::{ConnectionPool, PoolLimits};
    use enrich_shared::retry::RetryPolicy;
    use enrich_shared::sink::EnrichmentSink;

    fn client_against(base: &str) -> BuiltWithClient {
        let pool = ConnectionPool::new(PoolLimits::default());
        let cache = Arc::new(ResponseCache::new(Arc::new(EnrichmentSink::new_in_memory())));
        let adapter = Arc::new(ProviderAdapter::new(
            "builtwith",
            pool,
            cache,
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        ));
        BuiltWithClient::new(adapter, SecretString::from("bw-key")).with_base_url(base)
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_domain_profile_parsed() {
        use axum::{routing::get, Json, Router};
        let app = Router::new().route(
            "/",
            get(|| async {
                Json(json!({
                    "Results": [{"Result": {"Paths": [{"Technologies": [{"Name": "React"}]}]}}],
                    "Errors": [],
                }))
            }),
        );
        let base = serve(app).await;

        let profile = client_against(&base)
            .domain_profile("acme.example", None)
            .await
            .unwrap();
        assert_eq!(
            profile["Results"][0]["Result"]["Paths"][0]["Technologies"][0]["Name"],
            "React"
        );
    }

    #[tokio::test]
    async fn test_embedded_errors_surface_as_provider_error() {
        use axum::{routing::get, Json, Router};
        let app = Router::new().route(
            "/",
            get(|| async {
                Json(json!({"Results": [], "Errors": [{"Message": "invalid domain"}]}))
            }),
        );
        let base = serve(app).await;

        let err = client_against(&base)
            .domain_profile("not a domain", None)
            .await
            .unwrap_err();
        match err {
            EnrichError::Provider { provider, message, .. } => {
                assert_eq!(provider, "builtwith");
                assert_eq!(message, "invalid domain");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
