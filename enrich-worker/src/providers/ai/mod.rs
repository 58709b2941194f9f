//! # AI Service
//!
//! LLM completions behind the prompt-fingerprint cache. Providers are enum
//! dispatch (OpenAI, Gemini); token usage is tracked per operation tag so
//! cost accounting survives cache hits.

pub mod gemini;
pub mod openai;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::Value;
use tracing::info;

use enrich_shared::cache::{AiCache, CompletionKey, TokenUsage};
use enrich_shared::config::WorkerConfig;
use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::http::ConnectionPool;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// Which LLM backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProviderKind {
    OpenAi,
    Gemini,
}

impl AiProviderKind {
    pub fn parse(name: &str) -> EnrichResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(EnrichError::validation(format!(
                "unsupported AI provider: {other}"
            ))),
        }
    }
}

/// Enum-dispatch LLM backend
#[derive(Debug)]
pub enum AiProvider {
    OpenAi(OpenAiClient),
    Gemini(GeminiClient),
}

impl AiProvider {
    fn model(&self) -> &str {
        match self {
            Self::OpenAi(client) => client.model(),
            Self::Gemini(client) => client.model(),
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => "openai",
            Self::Gemini(_) => "gemini",
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        schema: Option<&Value>,
        temperature: f64,
        operation_tag: &str,
    ) -> EnrichResult<(Value, TokenUsage)> {
        match self {
            Self::OpenAi(client) => client.generate(prompt, schema, temperature, operation_tag).await,
            Self::Gemini(client) => client.generate(prompt, schema, temperature, operation_tag).await,
        }
    }
}

/// Cached, usage-tracking completion service
#[derive(Debug)]
pub struct AiService {
    provider: AiProvider,
    cache: Arc<AiCache>,
    tenant_id: Option<String>,
    default_temperature: f64,
    cache_ttl: Option<Duration>,
    usage: Mutex<HashMap<String, TokenUsage>>,
}

impl AiService {
    pub fn new(provider: AiProvider, cache: Arc<AiCache>, tenant_id: Option<String>) -> Self {
        Self {
            provider,
            cache,
            tenant_id,
            default_temperature: 0.0,
            cache_ttl: None,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Build a service from config, failing when the provider's key is
    /// absent.
    pub fn from_config(
        kind: AiProviderKind,
        config: &WorkerConfig,
        cache: Arc<AiCache>,
        pool: Arc<ConnectionPool>,
        tenant_id: Option<String>,
    ) -> EnrichResult<Self> {
        let provider = match kind {
            AiProviderKind::OpenAi => {
                let key = require_key(config.openai_api_key.clone(), "OPENAI_API_KEY")?;
                AiProvider::OpenAi(OpenAiClient::new(pool, key))
            }
            AiProviderKind::Gemini => {
                let key = require_key(config.gemini_api_token.clone(), "GEMINI_API_TOKEN")?;
                AiProvider::Gemini(GeminiClient::new(pool, key))
            }
        };
        Ok(Self::new(provider, cache, tenant_id))
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Generate a JSON completion, consulting the cache first.
    ///
    /// A cache hit surfaces the stored token usage so cost accounting sees
    /// the call either way.
    pub async fn generate(
        &self,
        prompt: &str,
        schema: Option<&Value>,
        operation_tag: &str,
    ) -> EnrichResult<Value> {
        let key = CompletionKey {
            model: self.provider.model(),
            prompt,
            schema,
            temperature: self.default_temperature,
            tenant_id: self.tenant_id.as_deref(),
        };

        if let Some(hit) = self.cache.get(&key).await? {
            if let Some(usage) = hit.token_usage {
                self.track(usage);
            }
            info!(
                provider = self.provider.provider_name(),
                operation = operation_tag,
                "Completion served from cache"
            );
            return Ok(hit.response);
        }

        let (response, usage) = self
            .provider
            .generate(prompt, schema, self.default_temperature, operation_tag)
            .await?;
        self.track(usage.clone());
        self.cache
            .put(&key, response.clone(), Some(&usage), self.cache_ttl)
            .await?;
        Ok(response)
    }

    /// Usage recorded for one operation tag
    pub fn token_usage(&self, operation_tag: &str) -> Option<TokenUsage> {
        self.usage
            .lock()
            .expect("usage lock poisoned")
            .get(operation_tag)
            .cloned()
    }

    /// Combined usage across all operations
    pub fn total_token_usage(&self) -> Option<TokenUsage> {
        let usage = self.usage.lock().expect("usage lock poisoned");
        if usage.is_empty() {
            return None;
        }
        let mut total = TokenUsage {
            operation_tag: "total".to_string(),
            provider: self.provider.provider_name().to_string(),
            ..TokenUsage::default()
        };
        for entry in usage.values() {
            total.add(entry);
        }
        Some(total)
    }

    fn track(&self, usage: TokenUsage) {
        let mut map = self.usage.lock().expect("usage lock poisoned");
        match map.get_mut(&usage.operation_tag) {
            Some(existing) => existing.add(&usage),
            None => {
                map.insert(usage.operation_tag.clone(), usage);
            }
        }
    }
}

fn require_key(key: Option<SecretString>, name: &str) -> EnrichResult<SecretString> {
    key.ok_or_else(|| EnrichError::Config(format!("{name} environment variable required")))
}

/// Strip markdown code fences some models wrap JSON responses in
pub(crate) fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```json").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix("```").unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_shared::http::PoolLimits;
    use enrich_shared::sink::EnrichmentSink;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(AiProviderKind::parse("openai").unwrap(), AiProviderKind::OpenAi);
        assert_eq!(AiProviderKind::parse("Gemini").unwrap(), AiProviderKind::Gemini);
        assert!(AiProviderKind::parse("claude").is_err());
    }

    #[test]
    fn test_missing_key_rejected() {
        let config = enrich_shared::config::WorkerConfig {
            openai_api_key: None,
            ..test_worker_config()
        };
        let cache = Arc::new(AiCache::new(Arc::new(EnrichmentSink::new_in_memory())));
        let pool = ConnectionPool::new(PoolLimits::default());
        let err =
            AiService::from_config(AiProviderKind::OpenAi, &config, cache, pool, None).unwrap_err();
        assert!(matches!(err, EnrichError::Config(_)));
    }

    #[test]
    fn test_strip_json_fences() {
        assert_eq!(strip_json_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```\n{}\n```"), "{}");
    }

    #[test]
    fn test_usage_tracking_accumulates_by_tag() {
        let cache = Arc::new(AiCache::new(Arc::new(EnrichmentSink::new_in_memory())));
        let pool = ConnectionPool::new(PoolLimits::default());
        let service = AiService::new(
            AiProvider::OpenAi(OpenAiClient::new(pool, SecretString::from("k"))),
            cache,
            None,
        );

        service.track(usage_with("structure", 100));
        service.track(usage_with("structure", 50));
        service.track(usage_with("qualify", 10));

        assert_eq!(service.token_usage("structure").unwrap().total_tokens, 150);
        assert_eq!(service.token_usage("qualify").unwrap().total_tokens, 10);
        let total = service.total_token_usage().unwrap();
        assert_eq!(total.total_tokens, 160);
        assert_eq!(total.provider, "openai");
    }

    fn usage_with(tag: &str, tokens: u64) -> TokenUsage {
        TokenUsage {
            operation_tag: tag.to_string(),
            prompt_tokens: tokens / 2,
            completion_tokens: tokens - tokens / 2,
            total_tokens: tokens,
            total_cost_in_usd: 0.0,
            provider: "openai".to_string(),
        }
    }

    fn test_worker_config() -> enrich_shared::config::WorkerConfig {
        serde_json::from_value(serde_json::json!({
            "environment": "local",
            "worker_base_url": "http://localhost:8080",
            "django_base_url": "http://localhost:8000",
            "google_cloud_project": "test-project",
        }))
        .unwrap()
    }
}
