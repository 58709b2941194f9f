//! OpenAI chat-completions backend.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::warn;

use enrich_shared::cache::TokenUsage;
use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::http::ConnectionPool;
use enrich_shared::retry::{is_retryable_status, with_retry, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

// Pricing per 1K tokens for the default model
const INPUT_PRICE_PER_1K: f64 = 0.000_15;
const OUTPUT_PRICE_PER_1K: f64 = 0.000_6;

/// OpenAI REST client
#[derive(Debug)]
pub struct OpenAiClient {
    pool: Arc<ConnectionPool>,
    api_key: SecretString,
    model: String,
    base_url: String,
    policy: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(pool: Arc<ConnectionPool>, api_key: SecretString) -> Self {
        Self {
            pool,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            policy: RetryPolicy::provider(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at a different endpoint (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate a JSON completion with usage accounting
    pub async fn generate(
        &self,
        prompt: &str,
        schema: Option<&Value>,
        temperature: f64,
        operation_tag: &str,
    ) -> EnrichResult<(Value, TokenUsage)> {
        let mut system = "You are a helpful assistant that responds only in valid JSON format."
            .to_string();
        if let Some(schema) = schema {
            system.push_str(&format!(" The response must conform to this schema: {schema}"));
        }

        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": temperature,
            "response_format": {"type": "json_object"},
        });
        let url = format!("{}/chat/completions", self.base_url);

        let url_ref: &str = &url;
        let body_ref = &body;
        let response: Value = with_retry(&self.policy, "openai_chat_completion", || async move {
            let handle = self.pool.acquire()?;
            let response = handle
                .client()
                .post(url_ref)
                .bearer_auth(self.api_key.expose_secret())
                .json(body_ref)
                .send()
                .await?;

            let status = response.status().as_u16();
            if is_retryable_status(status) {
                return Err(EnrichError::retryable_status(status, url_ref));
            }
            if status >= 400 {
                let body = response.text().await.unwrap_or_default();
                return Err(EnrichError::provider("openai", status, body));
            }
            Ok(response.json().await?)
        })
        .await?;

        let content = response["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| EnrichError::Integrity("empty completion from OpenAI".to_string()))?;

        let parsed: Value = serde_json::from_str(content)
            .map_err(|e| EnrichError::Integrity(format!("completion is not valid JSON: {e}")))?;

        let prompt_tokens = response["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = response["usage"]["completion_tokens"].as_u64().unwrap_or(0);
        if prompt_tokens == 0 {
            warn!(operation = operation_tag, "OpenAI response carried no usage data");
        }

        let usage = TokenUsage {
            operation_tag: operation_tag.to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            total_cost_in_usd: (prompt_tokens as f64 / 1000.0) * INPUT_PRICE_PER_1K
                + (completion_tokens as f64 / 1000.0) * OUTPUT_PRICE_PER_1K,
            provider: "openai".to_string(),
        };
        Ok((parsed, usage))
    }
}
