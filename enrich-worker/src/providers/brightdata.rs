//! # BrightData Adapter
//!
//! LinkedIn dataset collection: trigger a snapshot for a batch of account
//! URLs, then poll the snapshot endpoint on a 10-second cadence until the
//! collection finishes. A 202 means collection is still in progress; the
//! poll is capped at 30 attempts (300 s total).

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use enrich_shared::error::{EnrichError, EnrichResult};

use super::{ProviderAdapter, RequestSpec};

const DEFAULT_BASE_URL: &str = "https://api.brightdata.com/datasets/v3";
const ACCOUNT_DATASET_ID: &str = "gd_l1vikfnt1wgvvqz95w";
const POLL_ATTEMPTS: u32 = 30;
const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    snapshot_id: String,
}

/// BrightData dataset collection client
#[derive(Debug)]
pub struct BrightDataClient {
    adapter: Arc<ProviderAdapter>,
    api_key: SecretString,
    base_url: String,
    poll_interval: Duration,
}

impl BrightDataClient {
    pub fn new(adapter: Arc<ProviderAdapter>, api_key: SecretString) -> Self {
        Self {
            adapter,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Point at a different endpoint (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[cfg(test)]
    pub(crate) fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Trigger data collection for account LinkedIn URLs; returns the
    /// snapshot ID to poll with.
    pub async fn trigger_account_collection(&self, urls: &[String]) -> EnrichResult<String> {
        debug!(url_count = urls.len(), "Triggering account data collection");
        let body: Vec<Value> = urls.iter().map(|url| json!({"url": url})).collect();
        let spec = RequestSpec::post(
            format!(
                "{}/trigger?dataset_id={ACCOUNT_DATASET_ID}&include_errors=true",
                self.base_url
            ),
            json!(body),
        )
        .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
        .header("Content-Type", "application/json")
        .no_cache();

        let (data, _status) = self.adapter.request(spec).await?;
        let parsed: TriggerResponse = serde_json::from_value(data)
            .map_err(|e| EnrichError::Integrity(format!("trigger response missing snapshot_id: {e}")))?;
        Ok(parsed.snapshot_id)
    }

    /// Poll a snapshot until collection completes. Returns the collected
    /// account records.
    pub async fn collect_snapshot(&self, snapshot_id: &str) -> EnrichResult<Vec<Value>> {
        let url = format!("{}/snapshot/{snapshot_id}?format=json", self.base_url);

        for attempt in 1..=POLL_ATTEMPTS {
            let spec = RequestSpec::get(&url)
                .header(
                    "Authorization",
                    format!("Bearer {}", self.api_key.expose_secret()),
                )
                .no_cache();
            let (data, status) = self.adapter.request(spec).await?;

            if status == 202 {
                debug!(
                    snapshot_id = snapshot_id,
                    attempt = attempt,
                    "Collection in progress, polling again"
                );
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let Value::Array(records) = data else {
                return Err(EnrichError::Integrity(format!(
                    "expected list response for snapshot {snapshot_id}"
                )));
            };
            return Ok(records);
        }

        error!(snapshot_id = snapshot_id, "Snapshot collection timed out");
        Err(EnrichError::timeout(format!(
            "snapshot {snapshot_id} collection"
        )))
    }
}
