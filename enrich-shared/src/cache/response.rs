//! # Response Cache
//!
//! Content-addressed cache for external API responses. Two tiers: a moka
//! in-process front (sized, TTL-aware) over the durable
//! `api_request_cache` table, so repeat lookups within a process never
//! touch the sink and repeat lookups across processes never pay the
//! provider twice.
//!
//! Only 2xx/3xx responses are inserted; error responses always bypass the
//! cache. Writes are idempotent appends; readers select the most recent
//! non-expired row for a key.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cache::key::{response_cache_key, strip_secret_headers};
use crate::error::EnrichResult;
use crate::sink::{EnrichmentSink, RESPONSE_CACHE_TABLE};

/// A cached response body with its original status
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub data: Value,
    pub status: u16,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    response: CachedResponse,
    expires_at: Option<DateTime<Utc>>,
}

/// Per-entry expiry for the in-process tier, driven by the row's
/// `expires_at` timestamp.
struct RowExpiry;

impl moka::Expiry<String, Arc<MemoryEntry>> for RowExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Arc<MemoryEntry>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        entry
            .expires_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Two-tier external API response cache
#[derive(Debug)]
pub struct ResponseCache {
    sink: Arc<EnrichmentSink>,
    memory: moka::future::Cache<String, Arc<MemoryEntry>>,
}

impl ResponseCache {
    pub fn new(sink: Arc<EnrichmentSink>) -> Self {
        Self {
            sink,
            memory: moka::future::Cache::builder()
                .max_capacity(10_000)
                .expire_after(RowExpiry)
                .build(),
        }
    }

    /// Look up a cached response for the request fingerprint.
    ///
    /// The key is independent of credential header values; changing
    /// `Authorization` between calls must not break a hit.
    pub async fn get(
        &self,
        url: &str,
        params: &Value,
        headers: &BTreeMap<String, String>,
        tenant_id: Option<&str>,
    ) -> EnrichResult<Option<CachedResponse>> {
        let key = response_cache_key(url, params, headers);
        let mem_key = memory_key(&key, tenant_id);

        if let Some(entry) = self.memory.get(&mem_key).await {
            if !expired(entry.expires_at) {
                debug!(url = url, "Response cache hit (memory)");
                return Ok(Some(entry.response.clone()));
            }
        }

        let Some(row) = self
            .sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, &key, tenant_id)
            .await?
        else {
            debug!(url = url, "Response cache miss");
            return Ok(None);
        };

        let response = CachedResponse {
            data: embedded_json(row.get("response_data")),
            status: row
                .get("response_status")
                .and_then(Value::as_u64)
                .unwrap_or(200) as u16,
        };
        let expires_at = row
            .get("expires_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| at.with_timezone(&Utc));

        self.memory
            .insert(
                mem_key,
                Arc::new(MemoryEntry {
                    response: response.clone(),
                    expires_at,
                }),
            )
            .await;

        info!(url = url, status = response.status, "Response cache hit");
        Ok(Some(response))
    }

    /// Store a response. Error statuses (>= 400) are never cached.
    #[allow(clippy::too_many_arguments)]
    pub async fn put(
        &self,
        url: &str,
        method: &str,
        params: &Value,
        headers: &BTreeMap<String, String>,
        data: Value,
        status: u16,
        tenant_id: Option<&str>,
        ttl: Option<Duration>,
    ) -> EnrichResult<()> {
        if status >= 400 {
            debug!(url = url, status = status, "Not caching error response");
            return Ok(());
        }

        let key = response_cache_key(url, params, headers);
        let expires_at = ttl.map(|ttl| Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default());

        // Credential headers never reach the durable row
        let stored_headers = strip_secret_headers(headers);

        let row = json!({
            "cache_key": key,
            "request_method": method,
            "request_url": url,
            "request_params": params,
            "request_headers": stored_headers,
            "response_data": data,
            "response_status": status,
            "created_at": Utc::now().to_rfc3339(),
            "expires_at": expires_at.map(|at| at.to_rfc3339()),
            "tenant_id": tenant_id,
        });
        self.sink.insert(RESPONSE_CACHE_TABLE, vec![row]).await?;

        self.memory
            .insert(
                memory_key(&key, tenant_id),
                Arc::new(MemoryEntry {
                    response: CachedResponse { data, status },
                    expires_at,
                }),
            )
            .await;

        Ok(())
    }

    /// Background cleanup: drop rows past `expires_at` or older than `days`
    pub async fn clear_expired(&self, days: i64) -> EnrichResult<u64> {
        self.memory.invalidate_all();
        self.sink.delete_expired(RESPONSE_CACHE_TABLE, days).await
    }
}

fn memory_key(key: &str, tenant_id: Option<&str>) -> String {
    format!("{}|{key}", tenant_id.unwrap_or(""))
}

fn expired(expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
}

/// Sink rows may carry nested JSON either inline or as a string column
pub(crate) fn embedded_json(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}
