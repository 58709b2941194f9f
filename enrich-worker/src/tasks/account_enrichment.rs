//! # Account Enrichment Task
//!
//! Company-info enrichment for one account: read the company website
//! through the page-reader provider, then structure the raw page into the
//! company-info shape with the AI service. Either stage degrades
//! gracefully when its provider key is not configured, so local runs
//! still produce a usable (if thinner) result.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{json, Value};
use tracing::{debug, warn};

use enrich_shared::error::EnrichResult;

use crate::providers::{AiProviderKind, AiService, BuiltWithClient, JinaClient};
use crate::task::{EnrichmentTask, ProgressHandle, TaskContext, TaskOutput, TaskPayload};

const STRUCTURE_PROMPT: &str = "Extract structured company information from this web page. \
Return JSON with keys: company_name, description, industry, location, employee_count_estimate, \
technologies. Page content:\n\n";

/// Single-account company-info enrichment
#[derive(Debug)]
pub struct AccountEnrichmentTask;

#[async_trait]
impl EnrichmentTask for AccountEnrichmentTask {
    fn name(&self) -> &str {
        "account_enrichment"
    }

    fn enrichment_type(&self) -> &str {
        "company_info"
    }

    fn source(&self) -> &str {
        "jina_ai"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        payload: &TaskPayload,
        progress: &ProgressHandle,
    ) -> EnrichResult<TaskOutput> {
        let website = payload
            .extra_field("website_url")
            .and_then(Value::as_str)
            .map(str::to_string);

        // Stage 1: fetch the page
        let page = match (&website, jina_token(ctx)) {
            (Some(url), Some(token)) => {
                let jina = JinaClient::new(ctx.adapter("jina_ai").into(), token);
                Some(
                    jina.read_url(url, &[], payload.tenant_id.clone())
                        .await?,
                )
            }
            (Some(_), None) => {
                warn!("JINA_API_TOKEN not configured, skipping page fetch");
                None
            }
            (None, _) => {
                debug!("No website_url in payload, skipping page fetch");
                None
            }
        };
        progress.progress(30, None).await?;

        // Markdown scanning is CPU-bound on large pages; keep it off the
        // request reactor
        let page_summary = match &page {
            Some(page) => {
                let page = page.clone();
                Some(ctx.offload.run_cpu(move || summarize_page(&page)).await?)
            }
            None => None,
        };

        // Stage 2: structure the raw page
        let processed = match (&page, ai_service(ctx, payload)) {
            (Some(page), Some(ai)) => {
                let prompt = format!("{STRUCTURE_PROMPT}{page}");
                let mut structured = ai.generate(&prompt, None, "structure_account").await?;
                if let (Some(obj), Some(summary)) = (structured.as_object_mut(), &page_summary) {
                    obj.entry("page_summary").or_insert(summary.clone());
                }
                structured
            }
            _ => {
                let mut profile =
                    fallback_profile(payload, website.as_deref(), page.as_deref());
                if let Some(summary) = &page_summary {
                    profile["page_summary"] = summary.clone();
                }
                profile
            }
        };
        progress.progress(70, None).await?;

        // Stage 3: technology profile, when the provider is configured
        let mut processed = processed;
        let mut partial_errors = Vec::new();
        if let (Some(domain), Some(key)) = (
            website.as_deref().and_then(domain_of),
            ctx.config.builtwith_api_key.clone(),
        ) {
            let builtwith = BuiltWithClient::new(ctx.adapter("builtwith").into(), key);
            match builtwith
                .domain_profile(domain, payload.tenant_id.clone())
                .await
            {
                Ok(profile) => {
                    if let Some(obj) = processed.as_object_mut() {
                        obj.insert("technology_profile".into(), technologies_of(&profile));
                    }
                }
                // Technology lookup failing does not sink the whole job
                Err(e) => {
                    warn!(domain = domain, error = %e, "Technology profile lookup failed");
                    partial_errors.push(json!({
                        "stage": "technology_profile",
                        "kind": e.kind(),
                        "message": e.to_string(),
                    }));
                }
            }
            progress.progress(90, None).await?;
        }

        Ok(TaskOutput {
            raw_data: page.map(|text| json!({"page": text})),
            processed_data: Some(processed),
            partial_errors,
            orchestration_data: None,
        })
    }
}

/// Flatten BuiltWith's nested path/technology structure to a name list
fn technologies_of(profile: &Value) -> Value {
    let names: Vec<&str> = profile["Results"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|result| result["Result"]["Paths"].as_array())
        .flatten()
        .filter_map(|path| path["Technologies"].as_array())
        .flatten()
        .filter_map(|tech| tech["Name"].as_str())
        .collect();
    json!(names)
}

fn jina_token(ctx: &TaskContext) -> Option<SecretString> {
    ctx.config.jina_api_token.clone()
}

fn ai_service(ctx: &TaskContext, payload: &TaskPayload) -> Option<AiService> {
    let kind = if ctx.config.openai_api_key.is_some() {
        AiProviderKind::OpenAi
    } else if ctx.config.gemini_api_token.is_some() {
        AiProviderKind::Gemini
    } else {
        return None;
    };
    AiService::from_config(
        kind,
        &ctx.config,
        ctx.ai_cache.clone(),
        ctx.pool.clone(),
        payload.tenant_id.clone(),
    )
    .ok()
}

/// Minimal profile when providers are unavailable
fn fallback_profile(payload: &TaskPayload, website: Option<&str>, page: Option<&str>) -> Value {
    json!({
        "company_name": payload
            .extra_field("company_name")
            .and_then(Value::as_str)
            .or_else(|| website.and_then(domain_of)),
        "website": website,
        "description": page.map(|p| p.chars().take(280).collect::<String>()),
        "industry": Value::Null,
        "technologies": [],
    })
}

/// Headline and first-paragraph extraction from a parsed-markdown page
fn summarize_page(page: &str) -> Value {
    let heading = page
        .lines()
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim());
    let first_paragraph = page
        .split("\n\n")
        .map(str::trim)
        .find(|block| !block.is_empty() && !block.starts_with('#'));

    json!({
        "heading": heading,
        "first_paragraph": first_paragraph.map(|p| p.chars().take(400).collect::<String>()),
        "length": page.len(),
    })
}

fn domain_of(url: &str) -> Option<&str> {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let host = stripped.split('/').next()?;
    Some(host.strip_prefix("www.").unwrap_or(host))
}
