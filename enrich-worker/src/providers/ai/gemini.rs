//! Gemini generateContent backend.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use enrich_shared::cache::TokenUsage;
use enrich_shared::error::{EnrichError, EnrichResult};
use enrich_shared::http::ConnectionPool;
use enrich_shared::retry::{is_retryable_status, with_retry, RetryPolicy};

use super::strip_json_fences;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

// Blended per-1K-token estimate used for cost reporting
const PRICE_PER_1K: f64 = 0.000_15;

/// Gemini REST client
#[derive(Debug)]
pub struct GeminiClient {
    pool: Arc<ConnectionPool>,
    api_key: SecretString,
    model: String,
    base_url: String,
    policy: RetryPolicy,
}

impl GeminiClient {
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

    /// Point at a different endpoint (tests)
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
        let mut generation_config = json!({
            "temperature": temperature,
            "response_mime_type": "application/json",
        });
        if let Some(schema) = schema {
            generation_config["response_schema"] = schema.clone();
        }

        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": generation_config,
        });
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            self.model,
            self.api_key.expose_secret()
        );

        let url_ref: &str = &url;
        let body_ref = &body;
        let response: Value = with_retry(&self.policy, "gemini_generate_content", || async move {
            let handle = self.pool.acquire()?;
            let response = handle.client().post(url_ref).json(body_ref).send().await?;

            let status = response.status().as_u16();
            if is_retryable_status(status) {
                return Err(EnrichError::retryable_status(status, "gemini generateContent"));
            }
            if status >= 400 {
                let body = response.text().await.unwrap_or_default();
                return Err(EnrichError::provider("gemini", status, body));
            }
            Ok(response.json().await?)
        })
        .await?;

        let text = response["candidates"]
            .get(0)
            .and_then(|c| c["content"]["parts"].get(0))
            .and_then(|part| part["text"].as_str())
            .ok_or_else(|| EnrichError::Integrity("empty completion from Gemini".to_string()))?;

        let parsed: Value = serde_json::from_str(strip_json_fences(text))
            .map_err(|e| EnrichError::Integrity(format!("completion is not valid JSON: {e}")))?;

        let prompt_tokens = response["usageMetadata"]["promptTokenCount"]
            .as_u64()
            .unwrap_or(0);
        let completion_tokens = response["usageMetadata"]["candidatesTokenCount"]
            .as_u64()
            .unwrap_or(0);
        let total_tokens = response["usageMetadata"]["totalTokenCount"]
            .as_u64()
            .unwrap_or(prompt_tokens + completion_tokens);

        let usage = TokenUsage {
            operation_tag: operation_tag.to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            total_cost_in_usd: (total_tokens as f64 / 1000.0) * PRICE_PER_1K,
            provider: "gemini".to_string(),
        };
        Ok((parsed, usage))
    }
}
