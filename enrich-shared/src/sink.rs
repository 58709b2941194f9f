//! # Durable Sink
//!
//! Persistence for raw/processed enrichment payloads and the backing tier
//! of the request caches. Enum dispatch over the configured provider
//! (BigQuery in deployments, an in-memory table store for local runs and
//! tests) so call sites stay monomorphic and there are no trait objects
//! on the hot path.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::auth::IdTokenProvider;
use crate::error::{EnrichError, EnrichResult};

/// Raw + processed payload audit table
pub const RAW_DATA_TABLE: &str = "enrichment_raw_data";
/// External API response cache table
pub const RESPONSE_CACHE_TABLE: &str = "api_request_cache";
/// LLM completion cache table
pub const AI_CACHE_TABLE: &str = "ai_cache";

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// One enrichment audit record destined for `enrichment_raw_data`
#[derive(Debug, Clone)]
pub struct EnrichmentRecord {
    pub job_id: String,
    pub tenant_id: Option<String>,
    pub status: String,
    pub entity_type: String,
    pub entity_id: String,
    pub source: String,
    pub raw_data: Value,
    pub processed_data: Value,
    pub error_details: Option<Value>,
}

impl EnrichmentRecord {
    fn into_row(self) -> Value {
        let now = Utc::now().to_rfc3339();
        json!({
            "job_id": self.job_id,
            "tenant_id": self.tenant_id,
            "status": self.status,
            "entity_type": self.entity_type,
            "entity_id": self.entity_id,
            "source": self.source,
            "raw_data": self.raw_data,
            "processed_data": self.processed_data,
            "error_details": self.error_details,
            "created_at": now,
            "updated_at": now,
        })
    }
}

/// Durable sink provider
#[derive(Debug)]
pub enum EnrichmentSink {
    BigQuery(BigQuerySink),
    Memory(MemorySink),
}

impl EnrichmentSink {
    /// In-memory sink for local development and tests
    pub fn new_in_memory() -> Self {
        Self::Memory(MemorySink::default())
    }

    /// BigQuery-backed sink
    pub fn new_bigquery(
        project: impl Into<String>,
        dataset: impl Into<String>,
        tokens: std::sync::Arc<IdTokenProvider>,
    ) -> Self {
        Self::BigQuery(BigQuerySink {
            http: reqwest::Client::new(),
            project: project.into(),
            dataset: dataset.into(),
            tokens,
        })
    }

    /// Provider name for logging/metrics
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::BigQuery(_) => "bigquery",
            Self::Memory(_) => "in_memory",
        }
    }

    /// Append rows to a table. Inserts are idempotent at the cache layer:
    /// readers pick the most recent row per key.
    pub async fn insert(&self, table: &str, rows: Vec<Value>) -> EnrichResult<()> {
        match self {
            Self::BigQuery(sink) => sink.insert(table, rows).await,
            Self::Memory(sink) => sink.insert(table, rows).await,
        }
    }

    /// Most recent non-expired row matching `cache_key`, optionally scoped
    /// to a tenant (rows with no tenant match any caller).
    pub async fn latest_cache_row(
        &self,
        table: &str,
        cache_key: &str,
        tenant_id: Option<&str>,
    ) -> EnrichResult<Option<Value>> {
        match self {
            Self::BigQuery(sink) => sink.latest_cache_row(table, cache_key, tenant_id).await,
            Self::Memory(sink) => sink.latest_cache_row(table, cache_key, tenant_id).await,
        }
    }

    /// Remove rows past `expires_at` or older than `days`. Returns the
    /// number of rows removed.
    pub async fn delete_expired(&self, table: &str, days: i64) -> EnrichResult<u64> {
        match self {
            Self::BigQuery(sink) => sink.delete_expired(table, days).await,
            Self::Memory(sink) => sink.delete_expired(table, days).await,
        }
    }

    /// Persist one enrichment audit record
    pub async fn insert_enrichment_record(&self, record: EnrichmentRecord) -> EnrichResult<()> {
        self.insert(RAW_DATA_TABLE, vec![record.into_row()]).await
    }
}

// =============================================================================
// In-memory provider
// =============================================================================

/// Table store used by tests and `ENVIRONMENT=local`
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemorySink {
    async fn insert(&self, table: &str, mut rows: Vec<Value>) -> EnrichResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .append(&mut rows);
        Ok(())
    }

    async fn latest_cache_row(
        &self,
        table: &str,
        cache_key: &str,
        tenant_id: Option<&str>,
    ) -> EnrichResult<Option<Value>> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table) else {
            return Ok(None);
        };
        let now = Utc::now();

        let best = rows
            .iter()
            .filter(|row| row.get("cache_key").and_then(Value::as_str) == Some(cache_key))
            .filter(|row| !row_expired(row, now))
            .filter(|row| match (row_tenant(row), tenant_id) {
                (None, _) => true,
                (Some(row_tenant), Some(tenant)) => row_tenant == tenant,
                (Some(_), None) => false,
            })
            .max_by_key(|row| row_created_at(row));

        Ok(best.cloned())
    }

    async fn delete_expired(&self, table: &str, days: i64) -> EnrichResult<u64> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let now = Utc::now();
        let cutoff = now - ChronoDuration::days(days);
        let before = rows.len();
        rows.retain(|row| {
            !row_expired(row, now) && row_created_at(row).map(|at| at >= cutoff).unwrap_or(true)
        });
        Ok((before - rows.len()) as u64)
    }

    /// Snapshot of a table's rows, for assertions
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

fn row_expired(row: &Value, now: DateTime<Utc>) -> bool {
    row.get("expires_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|at| at.with_timezone(&Utc) <= now)
        .unwrap_or(false)
}

fn row_tenant(row: &Value) -> Option<&str> {
    row.get("tenant_id").and_then(Value::as_str)
}

fn row_created_at(row: &Value) -> Option<DateTime<Utc>> {
    row.get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|at| at.with_timezone(&Utc))
}

// =============================================================================
// BigQuery provider (tabledata.insertAll + jobs.query REST)
// =============================================================================

#[derive(Debug)]
pub struct BigQuerySink {
    http: reqwest::Client,
    project: String,
    dataset: String,
    tokens: std::sync::Arc<IdTokenProvider>,
}

#[derive(Debug, Deserialize)]
struct InsertAllResponse {
    #[serde(default, rename = "insertErrors")]
    insert_errors: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<QueryRow>,
    #[serde(default, rename = "numDmlAffectedRows")]
    num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    f: Vec<QueryCell>,
}

#[derive(Debug, Deserialize)]
struct QueryCell {
    v: Option<Value>,
}

impl BigQuerySink {
    fn table_url(&self, table: &str) -> String {
        format!(
            "https://bigquery.googleapis.com/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.project, self.dataset, table
        )
    }

    fn query_url(&self) -> String {
        format!(
            "https://bigquery.googleapis.com/bigquery/v2/projects/{}/queries",
            self.project
        )
    }

    fn table_ref(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, table)
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> EnrichResult<()> {
        let token = self.tokens.access_token(BIGQUERY_SCOPE).await?;
        let body = json!({
            "rows": rows.into_iter().map(|row| json!({"json": row})).collect::<Vec<_>>(),
        });

        let response = self
            .http
            .post(self.table_url(table))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EnrichError::Sink(format!(
                "insertAll into {table} returned {status}: {text}"
            )));
        }

        let parsed: InsertAllResponse = response.json().await?;
        if !parsed.insert_errors.is_empty() {
            error!(table = table, errors = ?parsed.insert_errors, "Sink rejected rows");
            return Err(EnrichError::Sink(format!(
                "insertAll into {table} rejected {} rows",
                parsed.insert_errors.len()
            )));
        }

        debug!(table = table, "Sink insert complete");
        Ok(())
    }

    async fn latest_cache_row(
        &self,
        table: &str,
        cache_key: &str,
        tenant_id: Option<&str>,
    ) -> EnrichResult<Option<Value>> {
        // TO_JSON_STRING lets us ship the whole row through the REST cell
        // format without mirroring the table schema here.
        let query = format!(
            "SELECT TO_JSON_STRING(t) FROM {} t \
             WHERE cache_key = @cache_key \
             AND (expires_at IS NULL OR expires_at > CURRENT_TIMESTAMP()) \
             AND (tenant_id IS NULL OR tenant_id = @tenant_id) \
             ORDER BY created_at DESC LIMIT 1",
            self.table_ref(table)
        );

        let body = json!({
            "query": query,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": [
                {
                    "name": "cache_key",
                    "parameterType": {"type": "STRING"},
                    "parameterValue": {"value": cache_key},
                },
                {
                    "name": "tenant_id",
                    "parameterType": {"type": "STRING"},
                    "parameterValue": {"value": tenant_id},
                },
            ],
        });

        let parsed = self.run_query(body).await?;
        let Some(cell) = parsed
            .rows
            .first()
            .and_then(|row| row.f.first())
            .and_then(|cell| cell.v.as_ref())
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };

        let row: Value = serde_json::from_str(cell)
            .map_err(|e| EnrichError::Sink(format!("malformed cache row: {e}")))?;
        Ok(Some(row))
    }

    async fn delete_expired(&self, table: &str, days: i64) -> EnrichResult<u64> {
        let query = format!(
            "DELETE FROM {} WHERE expires_at < CURRENT_TIMESTAMP() \
             OR created_at < TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL @days DAY)",
            self.table_ref(table)
        );
        let body = json!({
            "query": query,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": [{
                "name": "days",
                "parameterType": {"type": "INT64"},
                "parameterValue": {"value": days.to_string()},
            }],
        });

        let parsed = self.run_query(body).await?;
        Ok(parsed
            .num_dml_affected_rows
            .and_then(|n| n.parse().ok())
            .unwrap_or(0))
    }

    async fn run_query(&self, body: Value) -> EnrichResult<QueryResponse> {
        let token = self.tokens.access_token(BIGQUERY_SCOPE).await?;
        let response = self
            .http
            .post(self.query_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EnrichError::Sink(format!(
                "query returned {status}: {text}"
            )));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_row(key: &str, tenant: Option<&str>, created_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> Value {
        json!({
            "cache_key": key,
            "tenant_id": tenant,
            "response_data": {"ok": true},
            "response_status": 200,
            "created_at": created_at.to_rfc3339(),
            "expires_at": expires_at.map(|at| at.to_rfc3339()),
        })
    }

    #[tokio::test]
    async fn test_memory_insert_and_lookup() {
        let sink = EnrichmentSink::new_in_memory();
        sink.insert(
            RESPONSE_CACHE_TABLE,
            vec![cache_row("k1", None, Utc::now(), None)],
        )
        .await
        .unwrap();

        let row = sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, "k1", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["response_status"], 200);

        assert!(sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, "missing", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lookup_prefers_most_recent() {
        let sink = EnrichmentSink::new_in_memory();
        let old = Utc::now() - ChronoDuration::hours(2);
        let mut newer_row = cache_row("k", None, Utc::now(), None);
        newer_row["response_status"] = json!(201);

        sink.insert(
            RESPONSE_CACHE_TABLE,
            vec![cache_row("k", None, old, None), newer_row],
        )
        .await
        .unwrap();

        let row = sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, "k", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["response_status"], 201);
    }

    #[tokio::test]
    async fn test_expired_rows_skipped() {
        let sink = EnrichmentSink::new_in_memory();
        let expired = Some(Utc::now() - ChronoDuration::minutes(1));
        sink.insert(
            RESPONSE_CACHE_TABLE,
            vec![cache_row("k", None, Utc::now(), expired)],
        )
        .await
        .unwrap();

        assert!(sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, "k", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let sink = EnrichmentSink::new_in_memory();
        sink.insert(
            RESPONSE_CACHE_TABLE,
            vec![
                cache_row("k", Some("tenant-a"), Utc::now(), None),
            ],
        )
        .await
        .unwrap();

        // Matching tenant sees the row
        assert!(sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, "k", Some("tenant-a"))
            .await
            .unwrap()
            .is_some());
        // Another tenant does not
        assert!(sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, "k", Some("tenant-b"))
            .await
            .unwrap()
            .is_none());
        // Tenant-less rows are shared
        sink.insert(
            RESPONSE_CACHE_TABLE,
            vec![cache_row("shared", None, Utc::now(), None)],
        )
        .await
        .unwrap();
        assert!(sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, "shared", Some("tenant-b"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_expired_removes_old_rows() {
        let sink = EnrichmentSink::new_in_memory();
        let ancient = Utc::now() - ChronoDuration::days(45);
        sink.insert(
            RESPONSE_CACHE_TABLE,
            vec![
                cache_row("old", None, ancient, None),
                cache_row("expired", None, Utc::now(), Some(Utc::now() - ChronoDuration::hours(1))),
                cache_row("fresh", None, Utc::now(), None),
            ],
        )
        .await
        .unwrap();

        let removed = sink.delete_expired(RESPONSE_CACHE_TABLE, 30).await.unwrap();
        assert_eq!(removed, 2);

        assert!(sink
            .latest_cache_row(RESPONSE_CACHE_TABLE, "fresh", None)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_enrichment_record_row_shape() {
        let sink = EnrichmentSink::new_in_memory();
        sink.insert_enrichment_record(EnrichmentRecord {
            job_id: "j-1".into(),
            tenant_id: Some("t-1".into()),
            status: "completed".into(),
            entity_type: "account".into(),
            entity_id: "acct-1".into(),
            source: "jina_ai".into(),
            raw_data: json!({"page": "..."}),
            processed_data: json!({"company_name": "Acme"}),
            error_details: None,
        })
        .await
        .unwrap();

        let EnrichmentSink::Memory(memory) = &sink else {
            panic!("expected memory sink");
        };
        let rows = memory.rows(RAW_DATA_TABLE).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["job_id"], "j-1");
        assert_eq!(rows[0]["entity_type"], "account");
        assert!(rows[0]["created_at"].is_string());
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(EnrichmentSink::new_in_memory().provider_name(), "in_memory");
    }
}
