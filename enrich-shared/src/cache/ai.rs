//! # AI Completion Cache
//!
//! Prompt-fingerprint cache for LLM completions, keyed on
//! `{model, prompt, response schema, temperature, tenant}`. Deterministic
//! completions (temperature 0) cache for 24 hours by default; stochastic
//! ones still cache, but only for an hour. Token usage is stored with the
//! entry and surfaced back on a hit so cost accounting sees cached calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cache::key::{completion_cache_key, fingerprint};
use crate::cache::response::embedded_json;
use crate::error::EnrichResult;
use crate::sink::{EnrichmentSink, AI_CACHE_TABLE};

/// Default TTL for temperature-0 completions
pub const DETERMINISTIC_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default TTL for stochastic completions
pub const STOCHASTIC_TTL: Duration = Duration::from_secs(60 * 60);

/// Token accounting for one completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub operation_tag: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_in_usd: f64,
    pub provider: String,
}

impl TokenUsage {
    /// Fold another usage record into this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.total_cost_in_usd += other.total_cost_in_usd;
    }
}

/// A cached completion with the usage recorded when it was generated
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCompletion {
    pub response: Value,
    pub token_usage: Option<TokenUsage>,
}

/// Completion identity for cache lookups
#[derive(Debug, Clone, Copy)]
pub struct CompletionKey<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub schema: Option<&'a Value>,
    pub temperature: f64,
    pub tenant_id: Option<&'a str>,
}

impl CompletionKey<'_> {
    fn cache_key(&self) -> String {
        completion_cache_key(
            self.model,
            self.prompt,
            self.schema,
            self.temperature,
            self.tenant_id,
        )
    }

    /// TTL applied when the caller does not override
    pub fn default_ttl(&self) -> Duration {
        if self.temperature == 0.0 {
            DETERMINISTIC_TTL
        } else {
            STOCHASTIC_TTL
        }
    }
}

/// Two-tier LLM completion cache
#[derive(Debug)]
pub struct AiCache {
    sink: Arc<EnrichmentSink>,
    memory: moka::future::Cache<String, Arc<CachedCompletion>>,
}

impl AiCache {
    pub fn new(sink: Arc<EnrichmentSink>) -> Self {
        Self {
            sink,
            memory: moka::future::Cache::builder()
                .max_capacity(2_000)
                .time_to_live(STOCHASTIC_TTL)
                .build(),
        }
    }

    /// Look up a cached completion
    pub async fn get(&self, key: &CompletionKey<'_>) -> EnrichResult<Option<CachedCompletion>> {
        let cache_key = key.cache_key();

        if let Some(entry) = self.memory.get(&cache_key).await {
            debug!(model = key.model, "AI cache hit (memory)");
            return Ok(Some(entry.as_ref().clone()));
        }

        let Some(row) = self
            .sink
            .latest_cache_row(AI_CACHE_TABLE, &cache_key, key.tenant_id)
            .await?
        else {
            debug!(model = key.model, "AI cache miss");
            return Ok(None);
        };

        let completion = CachedCompletion {
            response: embedded_json(row.get("response")),
            token_usage: row
                .get("token_usage")
                .map(|v| embedded_json(Some(v)))
                .and_then(|v| serde_json::from_value(v).ok()),
        };
        self.memory
            .insert(cache_key, Arc::new(completion.clone()))
            .await;

        info!(model = key.model, temperature = key.temperature, "AI cache hit");
        Ok(Some(completion))
    }

    /// Store a completion with its usage. `ttl` of `None` applies the
    /// temperature-derived default.
    pub async fn put(
        &self,
        key: &CompletionKey<'_>,
        response: Value,
        token_usage: Option<&TokenUsage>,
        ttl: Option<Duration>,
    ) -> EnrichResult<()> {
        let cache_key = key.cache_key();
        let ttl = ttl.unwrap_or_else(|| key.default_ttl());
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();

        let row = json!({
            "cache_key": cache_key,
            "model": key.model,
            "prompt": key.prompt,
            "schema_fingerprint": key.schema.map(fingerprint),
            "temperature": key.temperature,
            "response": response,
            "token_usage": token_usage.map(|u| serde_json::to_value(u).unwrap_or(Value::Null)),
            "created_at": Utc::now().to_rfc3339(),
            "expires_at": expires_at.to_rfc3339(),
            "tenant_id": key.tenant_id,
        });
        self.sink.insert(AI_CACHE_TABLE, vec![row]).await?;

        self.memory
            .insert(
                cache_key,
                Arc::new(CachedCompletion {
                    response,
                    token_usage: token_usage.cloned(),
                }),
            )
            .await;

        Ok(())
    }

    /// Background cleanup for the durable tier
    pub async fn clear_expired(&self, days: i64) -> EnrichResult<u64> {
        self.memory.invalidate_all();
        self.sink.delete_expired(AI_CACHE_TABLE, days).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> AiCache {
        AiCache::new(Arc::new(EnrichmentSink::new_in_memory()))
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            operation_tag: "structure_account".to_string(),
            prompt_tokens: 120,
            completion_tokens: 40,
            total_tokens: 160,
            total_cost_in_usd: 0.0024,
            provider: "openai".to_string(),
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit_with_usage() {
        let cache = cache();
        let key = CompletionKey {
            model: "gpt-4o-mini",
            prompt: "Summarize Acme Corp",
            schema: None,
            temperature: 0.0,
            tenant_id: None,
        };

        assert!(cache.get(&key).await.unwrap().is_none());

        cache
            .put(&key, json!({"summary": "Acme"}), Some(&usage()), None)
            .await
            .unwrap();

        let hit = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(hit.response["summary"], "Acme");
        let hit_usage = hit.token_usage.unwrap();
        assert_eq!(hit_usage.total_tokens, 160);
        assert_eq!(hit_usage.provider, "openai");
    }

    #[tokio::test]
    async fn test_temperature_participates_in_key() {
        let cache = cache();
        let deterministic = CompletionKey {
            model: "m",
            prompt: "p",
            schema: None,
            temperature: 0.0,
            tenant_id: None,
        };
        let stochastic = CompletionKey {
            temperature: 0.7,
            ..deterministic
        };

        cache
            .put(&deterministic, json!({"v": "cold"}), None, None)
            .await
            .unwrap();

        assert!(cache.get(&stochastic).await.unwrap().is_none());
        assert_eq!(
            cache.get(&deterministic).await.unwrap().unwrap().response["v"],
            "cold"
        );
    }

    #[tokio::test]
    async fn test_schema_participates_in_key() {
        let cache = cache();
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let with_schema = CompletionKey {
            model: "m",
            prompt: "p",
            schema: Some(&schema),
            temperature: 0.0,
            tenant_id: None,
        };
        let without = CompletionKey {
            schema: None,
            ..with_schema
        };

        cache.put(&with_schema, json!({"name": "x"}), None, None).await.unwrap();
        assert!(cache.get(&without).await.unwrap().is_none());
    }

    #[test]
    fn test_default_ttl_by_temperature() {
        let deterministic = CompletionKey {
            model: "m",
            prompt: "p",
            schema: None,
            temperature: 0.0,
            tenant_id: None,
        };
        assert_eq!(deterministic.default_ttl(), DETERMINISTIC_TTL);

        let stochastic = CompletionKey {
            temperature: 0.3,
            ..deterministic
        };
        assert_eq!(stochastic.default_ttl(), STOCHASTIC_TTL);
    }

    #[test]
    fn test_token_usage_add() {
        let mut total = usage();
        total.add(&usage());
        assert_eq!(total.prompt_tokens, 240);
        assert_eq!(total.total_tokens, 320);
        assert!((total.total_cost_in_usd - 0.0048).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let cache = cache();
        let tenant_a = CompletionKey {
            model: "m",
            prompt: "p",
            schema: None,
            temperature: 0.0,
            tenant_id: Some("a"),
        };
        let tenant_b = CompletionKey {
            tenant_id: Some("b"),
            ..tenant_a
        };

        cache.put(&tenant_a, json!({"t": "a"}), None, None).await.unwrap();
        assert!(cache.get(&tenant_b).await.unwrap().is_none());
        assert!(cache.get(&tenant_a).await.unwrap().is_some());
    }
}
