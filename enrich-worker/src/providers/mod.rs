//! # Provider Adapters
//!
//! Uniform outbound-call abstraction composing cache → pool → retry, plus
//! the concrete adapters for the external data sources the enrichment
//! tasks consume.

pub mod ai;
pub mod brightdata;
pub mod builtwith;
pub mod jina;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use enrich_shared::cache::ResponseCache;
use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::http::ConnectionPool;
use enrich_shared::retry::{is_retryable_status, with_retry, RetryPolicy};

pub use ai::{AiProviderKind, AiService};
pub use brightdata::BrightDataClient;
pub use builtwith::BuiltWithClient;
pub use jina::JinaClient;

/// How the response body should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
}

/// One outbound request through the adapter
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: String,
    pub url: String,
    /// Query parameters; participates in the cache key
    pub params: Value,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub format: ResponseFormat,
    pub tenant_id: Option<String>,
    /// Cache TTL; `None` stores without expiry
    pub cache_ttl: Option<Duration>,
    /// Skip both cache lookup and insertion (polling endpoints)
    pub skip_cache: bool,
    /// Bypass the lookup but still store the fresh response
    pub force_refresh: bool,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            params: Value::Object(Default::default()),
            headers: BTreeMap::new(),
            body: None,
            format: ResponseFormat::Json,
            tenant_id: None,
            cache_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            skip_cache: false,
            force_refresh: false,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: "POST".to_string(),
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn text(mut self) -> Self {
        self.format = ResponseFormat::Text;
        self
    }

    pub fn tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// Cache → pool → retry composition for one named provider
#[derive(Debug)]
pub struct ProviderAdapter {
    provider: &'static str,
    pool: Arc<ConnectionPool>,
    cache: Arc<ResponseCache>,
    policy: RetryPolicy,
}

impl ProviderAdapter {
    pub fn new(
        provider: &'static str,
        pool: Arc<ConnectionPool>,
        cache: Arc<ResponseCache>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            pool,
            cache,
            policy,
        }
    }

    /// Perform an outbound request.
    ///
    /// 1. Unless refreshing, consult the response cache.
    /// 2. Acquire a pool handle inside the retry wrapper.
    /// 3. Retryable statuses drive backoff; other 4xx/5xx raise
    ///    `ProviderError`.
    /// 4. Successful responses are stored (TTL + tenant respected).
    pub async fn request(&self, spec: RequestSpec) -> EnrichResult<(Value, u16)> {
        info!(
            provider = self.provider,
            method = %spec.method,
            url = %spec.url,
            "Provider request started"
        );

        if !spec.skip_cache && !spec.force_refresh {
            if let Some(hit) = self
                .cache
                .get(&spec.url, &spec.params, &spec.headers, spec.tenant_id.as_deref())
                .await?
            {
                info!(
                    provider = self.provider,
                    url = %spec.url,
                    status = hit.status,
                    "Provider request served from cache"
                );
                return Ok((hit.data, hit.status));
            }
        }

        let spec_ref = &spec;
        let (data, status) = with_retry(&self.policy, self.provider, || async move {
            let spec = spec_ref;
            let handle = self.pool.acquire()?;
            let mut request = handle
                .client()
                .request(parse_method(&spec.method)?, spec.url.as_str());

            if let Some(params) = spec.params.as_object() {
                let query: Vec<(String, String)> = params
                    .iter()
                    .map(|(k, v)| (k.clone(), query_value(v)))
                    .collect();
                if !query.is_empty() {
                    request = request.query(&query);
                }
            }
            for (name, value) in &spec.headers {
                request = request.header(name, value);
            }
            if let Some(body) = &spec.body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status().as_u16();
            if is_retryable_status(status) {
                return Err(EnrichError::retryable_status(status, &spec.url));
            }

            let data = match spec.format {
                ResponseFormat::Text => Value::String(response.text().await?),
                ResponseFormat::Json => {
                    let bytes = response.bytes().await?;
                    if bytes.is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_slice(&bytes).map_err(|e| {
                            EnrichError::Integrity(format!(
                                "{} returned unparseable body: {e}",
                                self.provider
                            ))
                        })?
                    }
                }
            };
            Ok((data, status))
        })
        .await?;

        if status >= 400 {
            return Err(EnrichError::provider(
                self.provider,
                status,
                truncate(&data.to_string(), 512),
            ));
        }

        if !spec.skip_cache {
            self.cache
                .put(
                    &spec.url,
                    &spec.method,
                    &spec.params,
                    &spec.headers,
                    data.clone(),
                    status,
                    spec.tenant_id.as_deref(),
                    spec.cache_ttl,
                )
                .await?;
        }

        debug!(
            provider = self.provider,
            status = status,
            "Provider request finished"
        );
        Ok((data, status))
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }
}

fn parse_method(method: &str) -> EnrichResult<reqwest::Method> {
    method
        .parse()
        .map_err(|_| EnrichError::validation(format!("invalid HTTP method {method}")))
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i <= max)
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("{}…", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_spec_builders() {
        let spec = RequestSpec::get("https://api.example.com/v1")
            .header("Accept", "application/json")
            .params(serde_json::json!({"q": "acme"}))
            .tenant(Some("t-1".into()))
            .cache_ttl(Some(Duration::from_secs(60)));

        assert_eq!(spec.method, "GET");
        assert_eq!(spec.headers.get("Accept").unwrap(), "application/json");
        assert_eq!(spec.tenant_id.as_deref(), Some("t-1"));
        assert!(!spec.skip_cache);
    }

    #[test]
    fn test_post_spec_carries_body() {
        let spec = RequestSpec::post("https://api", serde_json::json!([{"url": "x"}]));
        assert_eq!(spec.method, "POST");
        assert!(spec.body.is_some());
    }

    #[test]
    fn test_no_cache_and_text_modes() {
        let spec = RequestSpec::get("https://r.jina.ai/x").text().no_cache();
        assert_eq!(spec.format, ResponseFormat::Text);
        assert!(spec.skip_cache);
    }

    #[test]
    fn test_parse_method() {
        assert!(parse_method("GET").is_ok());
        assert!(parse_method("POST").is_ok());
        assert!(parse_method("not a method").is_err());
    }

    #[test]
    fn test_query_value_strings_unquoted() {
        assert_eq!(query_value(&Value::String("a b".into())), "a b");
        assert_eq!(query_value(&serde_json::json!(3)), "3");
        assert_eq!(query_value(&serde_json::json!(true)), "true");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456789…");
    }
}
