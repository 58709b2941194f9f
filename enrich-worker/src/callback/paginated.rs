//! # Paginated Callback Client
//!
//! Splits a terminal payload whose lead lists exceed the page size into an
//! ordered sequence of ID-aligned fragments, delivered sequentially with
//! the same authenticated retry path as single-shot callbacks. Payloads at
//! or under the page size take the single-shot path unchanged.
//!
//! ## ID alignment
//!
//! A canonical ID ordering is built from `all_leads` (in order), then ids
//! appearing only in `qualified_leads`, then ids appearing only in
//! `structured_leads`. Each page rebuilds the three lists by filtering the
//! source maps to its chunk of ids, so the union of all pages equals the
//! original lead sets and concatenated page ids reproduce the canonical
//! ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use enrich_shared::envelope::{CallbackEnvelope, ChunkCounts, PaginationMeta};
use enrich_shared::error::EnrichResult;

use super::CallbackClient;

/// Default page size for lead-bearing payloads
pub const LEADS_PER_PAGE: usize = 20;

/// Pagination-aware callback sender
#[derive(Debug)]
pub struct PaginatedCallbackClient {
    inner: Arc<CallbackClient>,
    leads_per_page: usize,
}

impl PaginatedCallbackClient {
    pub fn new(inner: Arc<CallbackClient>) -> Self {
        Self {
            inner,
            leads_per_page: LEADS_PER_PAGE,
        }
    }

    /// Override the page size (tests, tuning)
    pub fn with_page_size(inner: Arc<CallbackClient>, leads_per_page: usize) -> Self {
        Self {
            inner,
            leads_per_page: leads_per_page.max(1),
        }
    }

    /// Send a callback, fragmenting when the lead lists exceed the page
    /// size. Pages are delivered strictly in ascending order; delivery
    /// stops at the first failing page.
    pub async fn send(&self, envelope: CallbackEnvelope) -> EnrichResult<()> {
        if !self.should_paginate(&envelope) {
            return self.inner.deliver(&envelope).await;
        }

        let pages = self.paginate(&envelope);
        let total = pages.len();
        info!(
            job_id = %envelope.job_id,
            total_pages = total,
            "Delivering paginated callback"
        );

        for page in &pages {
            if let Err(e) = self.inner.deliver(page).await {
                warn!(
                    job_id = %envelope.job_id,
                    page = page.pagination.as_ref().map(|p| p.page).unwrap_or(0),
                    total_pages = total,
                    error = %e,
                    "Stopping paginated delivery at failed page"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// A payload paginates when any lead list exceeds the page size
    pub(crate) fn should_paginate(&self, envelope: &CallbackEnvelope) -> bool {
        let Some(processed) = envelope.processed_data.as_ref() else {
            return false;
        };
        ["all_leads", "qualified_leads", "structured_leads"]
            .iter()
            .filter_map(|key| processed.get(key).and_then(Value::as_array))
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            > self.leads_per_page
    }

    /// Split the envelope into ID-aligned pages
    pub(crate) fn paginate(&self, envelope: &CallbackEnvelope) -> Vec<CallbackEnvelope> {
        let Some(processed) = envelope.processed_data.as_ref().and_then(Value::as_object) else {
            return vec![envelope.clone()];
        };

        let qualified = leads_of(processed, "qualified_leads");
        let structured = leads_of(processed, "structured_leads");
        let all = leads_of(processed, "all_leads");

        let qualified_by_id = by_id(&qualified);
        let structured_by_id = by_id(&structured);
        let all_by_id = by_id(&all);

        // Canonical ordering: all_leads first, then unseen qualified, then
        // unseen structured
        let mut ordered: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for source in [&all, &qualified, &structured] {
            for lead in source.iter().copied() {
                if let Some(id) = lead_id(lead) {
                    if seen.insert(id.clone()) {
                        ordered.push(id);
                    }
                }
            }
        }

        let total_leads = ordered.len();
        let total_pages = total_leads.div_ceil(self.leads_per_page);

        let mut pages = Vec::with_capacity(total_pages);
        for (index, chunk) in ordered.chunks(self.leads_per_page).enumerate() {
            let page_qualified = collect_chunk(chunk, &qualified_by_id);
            let page_structured = collect_chunk(chunk, &structured_by_id);
            let page_all = collect_chunk(chunk, &all_by_id);

            let mut page_processed = processed.clone();
            let counts = ChunkCounts {
                qualified_leads: page_qualified.len(),
                structured_leads: page_structured.len(),
                all_leads: page_all.len(),
            };
            page_processed.insert("qualified_leads".into(), json!(page_qualified));
            page_processed.insert("structured_leads".into(), json!(page_structured));
            page_processed.insert("all_leads".into(), json!(page_all));

            // Full envelope copy per page: status, attempts, and trace_id
            // ride every fragment verbatim
            let mut page = envelope.clone();
            page.processed_data = Some(Value::Object(page_processed));
            page.pagination = Some(PaginationMeta {
                page: index + 1,
                total_pages,
                leads_per_page: self.leads_per_page,
                total_leads,
                current_chunk: counts,
            });
            pages.push(page);
        }
        pages
    }

    /// Receiver reachability, from the inner client's breaker
    pub fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }
}

fn leads_of<'a>(processed: &'a serde_json::Map<String, Value>, key: &str) -> Vec<&'a Value> {
    processed
        .get(key)
        .and_then(Value::as_array)
        .map(|leads| leads.iter().collect())
        .unwrap_or_default()
}

fn lead_id(lead: &Value) -> Option<String> {
    match lead.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn by_id<'a>(leads: &[&'a Value]) -> HashMap<String, &'a Value> {
    leads
        .iter()
        .filter_map(|lead| lead_id(lead).map(|id| (id, *lead)))
        .collect()
}

fn collect_chunk<'a>(chunk: &[String], source: &HashMap<String, &'a Value>) -> Vec<&'a Value> {
    chunk
        .iter()
        .filter_map(|id| source.get(id).copied())
        .collect()
}
