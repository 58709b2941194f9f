//! # Jina Adapter
//!
//! Page reading (`r.jina.ai`) and web search (`s.jina.ai`). Both return
//! parsed-markdown text; the bearer token is attached here so callers
//! never handle it.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use enrich_shared::error::{EnrichError, EnrichResult};

use super::{ProviderAdapter, RequestSpec};

const DEFAULT_READER_URL: &str = "https://r.jina.ai";
const DEFAULT_SEARCH_URL: &str = "https://s.jina.ai";
const PAGE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Jina reader + search client
#[derive(Debug)]
pub struct JinaClient {
    adapter: Arc<ProviderAdapter>,
    api_token: SecretString,
    reader_url: String,
    search_url: String,
}

impl JinaClient {
    pub fn new(adapter: Arc<ProviderAdapter>, api_token: SecretString) -> Self {
        Self {
            adapter,
            api_token,
            reader_url: DEFAULT_READER_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
        }
    }

    /// Point at different endpoints (tests)
    pub fn with_base_urls(
        mut self,
        reader_url: impl Into<String>,
        search_url: impl Into<String>,
    ) -> Self {
        self.reader_url = reader_url.into();
        self.search_url = search_url.into();
        self
    }

    /// Read a URL through the reader API, returning the parsed page.
    ///
    /// Extra headers (e.g. `X-Target-Selector`) may be supplied; the
    /// authorization header is always attached here.
    pub async fn read_url(
        &self,
        url: &str,
        headers: &[(String, String)],
        tenant_id: Option<String>,
    ) -> EnrichResult<String> {
        let mut spec = RequestSpec::get(format!("{}/{url}", self.reader_url))
            .text()
            .tenant(tenant_id)
            .cache_ttl(Some(PAGE_CACHE_TTL));
        for (name, value) in headers {
            spec = spec.header(name, value);
        }
        spec = spec.header(
            "Authorization",
            format!("Bearer {}", self.api_token.expose_secret()),
        );

        let (data, _status) = self.adapter.request(spec).await?;
        text_of(data)
    }

    /// Run a web search through the search API, returning result text
    pub async fn search(&self, query: &str, tenant_id: Option<String>) -> EnrichResult<String> {
        let spec = RequestSpec::get(format!("{}/{query}", self.search_url))
            .text()
            .tenant(tenant_id)
            .cache_ttl(Some(PAGE_CACHE_TTL))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_token.expose_secret()),
            );

        let (data, _status) = self.adapter.request(spec).await?;
        text_of(data)
    }
}

fn text_of(data: Value) -> EnrichResult<String> {
    match data {
        Value::String(text) => Ok(text),
        other => Err(EnrichError::Integrity(format!(
            "expected text response, got {other}"
        ))),
    }
}
