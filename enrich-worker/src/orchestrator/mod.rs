//! # Dependency Orchestrator
//!
//! Topological execution of chained column-generation tasks. The chain's
//! state lives entirely inside the `orchestration_data` field riding each
//! task envelope: enqueue the head column with the remaining order as
//! `next_columns`, and when the head's terminal callback arrives, enqueue
//! the next one. No server-side chain state beyond an in-flight guard, so
//! retries stay safe as long as receivers treat duplicate terminals as
//! idempotent.
//!
//! A `failed` terminal halts the chain; downstream columns never run. At
//! most one column is in flight per `(tenant, entity set)` fingerprint,
//! which serializes dependent work without global locks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use enrich_shared::envelope::{CallbackEnvelope, CallbackStatus};
use enrich_shared::error::{EnrichError, EnrichResult};

use crate::queue::{ScheduledTask, TaskQueue};
use crate::task::TaskPayload;

/// Task that executes one column of the chain
pub const COLUMN_TASK: &str = "column_generation";

fn default_batch_size() -> usize {
    10
}

/// A request to generate a set of dependent columns for an entity set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub account_id: String,
    pub tenant_id: String,
    pub column_ids: Vec<String>,
    pub entity_ids: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Directed edges `(prerequisite, dependent)` among the requested
    /// columns; edges touching unknown columns are ignored
    #[serde(default)]
    pub dependencies: Vec<(String, String)>,
}

/// Chain state carried through task envelopes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationData {
    pub next_columns: Vec<String>,
    pub entity_ids: Vec<String>,
    pub batch_size: usize,
    pub tenant_id: String,
    pub account_id: String,
}

/// Serializes dependent column generation through terminal callbacks
#[derive(Debug)]
pub struct ColumnOrchestrator {
    queue: Arc<TaskQueue>,
    in_flight: DashMap<String, ()>,
}

impl ColumnOrchestrator {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self {
            queue,
            in_flight: DashMap::new(),
        }
    }

    /// Validate, sort, and enqueue the head of a new chain
    pub async fn start(&self, request: OrchestrationRequest) -> EnrichResult<ScheduledTask> {
        if request.column_ids.is_empty() {
            return Err(EnrichError::validation("column_ids must not be empty"));
        }
        if request.entity_ids.is_empty() {
            return Err(EnrichError::validation("entity_ids must not be empty"));
        }

        let ordered = topological_order(&request.column_ids, &request.dependencies)?;

        let fingerprint = chain_fingerprint(&request.tenant_id, &request.entity_ids);
        if self.in_flight.insert(fingerprint.clone(), ()).is_some() {
            return Err(EnrichError::validation(
                "a column chain is already in flight for this entity set",
            ));
        }

        info!(
            tenant_id = %request.tenant_id,
            columns = ordered.len(),
            entities = request.entity_ids.len(),
            "Starting column generation chain"
        );

        let head = ordered[0].clone();
        let rest = ordered[1..].to_vec();
        let scheduled = self
            .enqueue_column(
                &head,
                OrchestrationData {
                    next_columns: rest,
                    entity_ids: request.entity_ids.clone(),
                    batch_size: request.batch_size,
                    tenant_id: request.tenant_id.clone(),
                    account_id: request.account_id.clone(),
                },
            )
            .await;

        if scheduled.is_err() {
            self.in_flight.remove(&fingerprint);
        }
        scheduled
    }

    /// Observe a terminal callback and chain the next column if one is
    /// pending. Non-terminal envelopes and envelopes without orchestration
    /// data are ignored.
    pub async fn observe_terminal(&self, envelope: &CallbackEnvelope) {
        if !envelope.is_terminal() {
            return;
        }
        let Some(data) = envelope.orchestration_data.as_ref() else {
            return;
        };
        let data: OrchestrationData = match serde_json::from_value(data.clone()) {
            Ok(data) => data,
            Err(e) => {
                error!(job_id = %envelope.job_id, error = %e, "Malformed orchestration data");
                return;
            }
        };
        let fingerprint = chain_fingerprint(&data.tenant_id, &data.entity_ids);

        if envelope.status == CallbackStatus::Failed {
            warn!(
                job_id = %envelope.job_id,
                pending_columns = data.next_columns.len(),
                "Column failed, halting chain"
            );
            self.in_flight.remove(&fingerprint);
            return;
        }

        if data.next_columns.is_empty() {
            info!(tenant_id = %data.tenant_id, "Column generation chain complete");
            self.in_flight.remove(&fingerprint);
            return;
        }

        let head = data.next_columns[0].clone();
        let rest = data.next_columns[1..].to_vec();
        info!(column_id = %head, remaining = rest.len(), "Chaining next column");

        let result = self
            .enqueue_column(
                &head,
                OrchestrationData {
                    next_columns: rest,
                    ..data
                },
            )
            .await;
        if let Err(e) = result {
            error!(column_id = %head, error = %e, "Failed to chain next column, halting");
            self.in_flight.remove(&fingerprint);
        }
    }

    /// Whether a chain is currently in flight for the entity set
    pub fn is_in_flight(&self, tenant_id: &str, entity_ids: &[String]) -> bool {
        self.in_flight
            .contains_key(&chain_fingerprint(tenant_id, entity_ids))
    }

    async fn enqueue_column(
        &self,
        column_id: &str,
        data: OrchestrationData,
    ) -> EnrichResult<ScheduledTask> {
        let payload = TaskPayload::from_request(
            COLUMN_TASK,
            json!({
                "account_id": data.account_id,
                "tenant_id": data.tenant_id,
                "column_id": column_id,
                "entity_ids": data.entity_ids,
                "batch_size": data.batch_size,
                "orchestration_data": serde_json::to_value(&data)?,
            }),
        )?;
        self.queue.create_task(COLUMN_TASK, &payload).await
    }
}

/// Stable Kahn's algorithm over the requested columns.
///
/// Edges touching columns outside the request are ignored; ties resolve in
/// request order. A cycle rejects the whole request.
pub fn topological_order(
    column_ids: &[String],
    dependencies: &[(String, String)],
) -> EnrichResult<Vec<String>> {
    let requested: HashMap<&str, usize> = column_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    if requested.len() != column_ids.len() {
        return Err(EnrichError::validation("duplicate column_ids in request"));
    }

    let mut in_degree: HashMap<&str, usize> =
        column_ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut edges_out: HashMap<&str, Vec<&str>> = HashMap::new();
    for (prerequisite, dependent) in dependencies {
        if requested.contains_key(prerequisite.as_str())
            && requested.contains_key(dependent.as_str())
        {
            edges_out
                .entry(prerequisite.as_str())
                .or_default()
                .push(dependent.as_str());
            *in_degree.get_mut(dependent.as_str()).expect("dependent is requested") += 1;
        }
    }

    // Request order keeps the sort deterministic
    let mut ready: VecDeque<&str> = column_ids
        .iter()
        .map(String::as_str)
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut ordered = Vec::with_capacity(column_ids.len());
    while let Some(column) = ready.pop_front() {
        ordered.push(column.to_string());
        for dependent in edges_out.remove(column).unwrap_or_default() {
            let degree = in_degree.get_mut(dependent).expect("dependent is requested");
            *degree -= 1;
            if *degree == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if ordered.len() != column_ids.len() {
        return Err(EnrichError::validation(
            "column dependencies contain a cycle",
        ));
    }
    Ok(ordered)
}

fn chain_fingerprint(tenant_id: &str, entity_ids: &[String]) -> String {
    let mut sorted = entity_ids.to_vec();
    sorted.sort();
    let digest = Sha256::digest(format!("{tenant_id}:{}", sorted.join(",")).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        // Trigger order [C, A, B] with A → B → C must execute A, B, C
        let ordered = topological_order(
            &ids(&["C", "A", "B"]),
            &edges(&[("A", "B"), ("B", "C")]),
        )
        .unwrap();
        assert_eq!(ordered, ids(&["A", "B", "C"]));
    }

    #[test]
    fn test_topological_order_without_edges_keeps_request_order() {
        let ordered = topological_order(&ids(&["x", "y", "z"]), &[]).unwrap();
        assert_eq!(ordered, ids(&["x", "y", "z"]));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = topological_order(
            &ids(&["A", "B"]),
            &edges(&[("A", "B"), ("B", "A")]),
        )
        .unwrap_err();
        assert!(matches!(err, EnrichError::Validation(_)));
    }

    #[test]
    fn test_self_edge_rejected() {
        let err = topological_order(&ids(&["A"]), &edges(&[("A", "A")])).unwrap_err();
        assert!(matches!(err, EnrichError::Validation(_)));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let err = topological_order(&ids(&["A", "A"]), &[]).unwrap_err();
        assert!(matches!(err, EnrichError::Validation(_)));
    }

    #[test]
    fn test_edges_outside_request_ignored() {
        let ordered = topological_order(
            &ids(&["A", "B"]),
            &edges(&[("A", "B"), ("external", "A")]),
        )
        .unwrap();
        assert_eq!(ordered, ids(&["A", "B"]));
    }

    #[test]
    fn test_fingerprint_is_order_insensitive() {
        let a = chain_fingerprint("t1", &ids(&["e1", "e2"]));
        let b = chain_fingerprint("t1", &ids(&["e2", "e1"]));
        assert_eq!(a, b);
        assert_ne!(a, chain_fingerprint("t2", &ids(&["e1", "e2"])));
    }

    #[test]
    fn test_orchestration_data_round_trip() {
        let data = OrchestrationData {
            next_columns: ids(&["B", "C"]),
            entity_ids: ids(&["e1"]),
            batch_size: 10,
            tenant_id: "t1".to_string(),
            account_id: "a1".to_string(),
        };
        let value = serde_json::to_value(&data).unwrap();
        let parsed: OrchestrationData = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.next_columns, data.next_columns);
        assert_eq!(parsed.tenant_id, "t1");
    }
}
