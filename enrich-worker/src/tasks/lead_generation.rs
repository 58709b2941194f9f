//! # Lead Generation Task
//!
//! Generates and qualifies leads for an account from the requested target
//! roles, expanding each role across seniority patterns. Large result sets
//! exercise the paginated terminal callback path.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use enrich_shared::error::{EnrichError, EnrichResult};
use tracing::warn;

use crate::providers::BrightDataClient;
use crate::task::{EnrichmentTask, ProgressHandle, TaskContext, TaskOutput, TaskPayload};

const DEFAULT_ROLES: [&str; 4] = ["Sales", "Marketing", "Engineering", "Revenue Operations"];
const SENIORITY_PATTERNS: [&str; 5] = ["VP of", "Head of", "Director of", "Chief", "Manager,"];

/// Qualified seniorities for the default scoring pass
const QUALIFYING_PREFIXES: [&str; 3] = ["VP of", "Head of", "Chief"];

/// Role-pattern lead generation for one account
#[derive(Debug)]
pub struct LeadGenerationTask;

#[async_trait]
impl EnrichmentTask for LeadGenerationTask {
    fn name(&self) -> &str {
        "lead_generation"
    }

    fn enrichment_type(&self) -> &str {
        "lead_identification"
    }

    fn source(&self) -> &str {
        "role_patterns"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(600)
    }

    fn create_payload(&self, body: Value) -> EnrichResult<TaskPayload> {
        let payload = TaskPayload::from_request(self.name(), body)?;
        if let Some(roles) = payload.extra_field("target_roles") {
            let valid = roles
                .as_array()
                .map(|list| list.iter().all(Value::is_string))
                .unwrap_or(false);
            if !valid {
                return Err(EnrichError::validation(
                    "target_roles must be a list of strings",
                ));
            }
        }
        Ok(payload)
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        payload: &TaskPayload,
        progress: &ProgressHandle,
    ) -> EnrichResult<TaskOutput> {
        // When the account's LinkedIn URLs ride along and the collector is
        // configured, pull the company snapshot as raw context first
        let mut raw_data = None;
        let mut partial_errors = Vec::new();
        let linkedin_urls: Vec<String> = payload
            .extra_field("account_linkedin_urls")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if let (false, Some(key)) = (
            linkedin_urls.is_empty(),
            ctx.config.brightdata_api_key.clone(),
        ) {
            let brightdata = BrightDataClient::new(ctx.adapter("brightdata").into(), key);
            match collect_account_snapshot(&brightdata, &linkedin_urls).await {
                Ok(records) => raw_data = Some(json!({"brightdata_accounts": records})),
                Err(e) => {
                    warn!(error = %e, "Account snapshot collection failed");
                    partial_errors.push(json!({
                        "stage": "account_snapshot",
                        "kind": e.kind(),
                        "message": e.to_string(),
                    }));
                }
            }
            progress.progress(20, None).await?;
        }

        let roles: Vec<String> = payload
            .extra_field("target_roles")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_ROLES.iter().map(|s| s.to_string()).collect());

        let limit = payload
            .extra_field("lead_count")
            .and_then(Value::as_u64)
            .map(|n| n as usize);

        // Expand roles across seniority patterns into candidate titles
        let mut all_leads = Vec::new();
        for role in &roles {
            for pattern in SENIORITY_PATTERNS {
                all_leads.push(json!({
                    "id": format!("L{}", all_leads.len() + 1),
                    "account_id": payload.account_id,
                    "title": format!("{pattern} {role}"),
                    "role_group": role,
                }));
                if limit.map(|l| all_leads.len() >= l).unwrap_or(false) {
                    break;
                }
            }
            if limit.map(|l| all_leads.len() >= l).unwrap_or(false) {
                break;
            }
        }
        progress.progress(40, None).await?;

        let qualified_leads: Vec<Value> = all_leads
            .iter()
            .filter(|lead| {
                lead["title"]
                    .as_str()
                    .map(|title| QUALIFYING_PREFIXES.iter().any(|p| title.starts_with(p)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let structured_leads: Vec<Value> = all_leads
            .iter()
            .map(|lead| {
                let mut structured = lead.clone();
                structured["evaluation"] = json!({
                    "qualified": qualified_leads.iter().any(|q| q["id"] == lead["id"]),
                });
                structured
            })
            .collect();
        progress.progress(80, None).await?;

        let processed = json!({
            "all_leads": all_leads,
            "qualified_leads": qualified_leads,
            "structured_leads": structured_leads,
            "summary": {
                "total": all_leads.len(),
                "qualified": qualified_leads.len(),
                "roles": roles,
            },
        });

        Ok(TaskOutput {
            raw_data,
            processed_data: Some(processed),
            partial_errors,
            orchestration_data: None,
        })
    }
}

async fn collect_account_snapshot(
    brightdata: &BrightDataClient,
    urls: &[String],
) -> EnrichResult<Vec<Value>> {
    let snapshot_id = brightdata.trigger_account_collection(urls).await?;
    brightdata.collect_snapshot(&snapshot_id).await
}
