//! # Trace Context
//!
//! Ambient, scope-nested propagation of trace fields across async, thread,
//! and network boundaries. The five recognized fields (`trace_id`, `job_id`,
//! `account_id`, `lead_id`, `task_name`) ride a tokio task-local cell; every
//! task spawn and thread-pool offload captures the current context and
//! restores it inside the target frame.
//!
//! ## Design
//!
//! The context is an explicit value (`TraceContext`) plus scoping helpers.
//! `scope()` binds a context for the duration of a future and restores the
//! prior bindings on every exit path, including panics and cancellation;
//! task-local scoping gives us that for free. Ad-hoc `tokio::spawn` without
//! [`spawn_traced`] loses the context and is a bug.
//!
//! ## Payload precedence
//!
//! [`TraceContext::inject`] overlays the current non-empty fields onto a
//! payload but never overwrites values the caller already supplied: an
//! explicit `trace_id` in the payload wins over the ambient one.

use std::cell::RefCell;
use std::future::Future;

use serde_json::Value;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: RefCell<TraceContext>;
}

/// The five recognized trace fields
pub const TRACE_FIELDS: [&str; 5] = ["trace_id", "job_id", "account_id", "lead_id", "task_name"];

/// Snapshot of the ambient trace scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: Option<String>,
    pub job_id: Option<String>,
    pub account_id: Option<String>,
    pub lead_id: Option<String>,
    pub task_name: Option<String>,
}

impl TraceContext {
    /// Generate a unique trace ID
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Create a context with only a trace ID, generating one if absent
    pub fn with_trace_id(trace_id: Option<String>) -> Self {
        Self {
            trace_id: Some(trace_id.unwrap_or_else(Self::generate_id)),
            ..Self::default()
        }
    }

    /// Extract the recognized trace fields from a task payload, ignoring
    /// everything else.
    pub fn extract(payload: &Value) -> Self {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            trace_id: field("trace_id"),
            job_id: field("job_id"),
            account_id: field("account_id"),
            lead_id: field("lead_id"),
            task_name: field("task_name"),
        }
    }

    /// Return a copy of `payload` with the non-empty trace fields overlaid.
    ///
    /// Caller-supplied values take precedence: a field already present (and
    /// non-null) in the payload is left untouched.
    pub fn inject(&self, payload: &Value) -> Value {
        let mut result = payload.clone();
        let Some(map) = result.as_object_mut() else {
            return result;
        };
        for (name, value) in [
            ("trace_id", &self.trace_id),
            ("job_id", &self.job_id),
            ("account_id", &self.account_id),
            ("lead_id", &self.lead_id),
            ("task_name", &self.task_name),
        ] {
            if let Some(value) = value {
                let existing = map.get(name);
                if existing.is_none() || existing == Some(&Value::Null) {
                    map.insert(name.to_string(), Value::String(value.clone()));
                }
            }
        }
        result
    }

    /// Merge non-empty fields of `other` over this context
    pub fn merged_with(&self, other: &TraceContext) -> Self {
        Self {
            trace_id: other.trace_id.clone().or_else(|| self.trace_id.clone()),
            job_id: other.job_id.clone().or_else(|| self.job_id.clone()),
            account_id: other.account_id.clone().or_else(|| self.account_id.clone()),
            lead_id: other.lead_id.clone().or_else(|| self.lead_id.clone()),
            task_name: other.task_name.clone().or_else(|| self.task_name.clone()),
        }
    }

    /// Build a tracing span carrying the five fields.
    ///
    /// Entering the span satisfies the logging contract: every record
    /// emitted inside it inherits the trace fields.
    pub fn span(&self, name: &'static str) -> tracing::Span {
        tracing::info_span!(
            "trace_scope",
            operation = name,
            trace_id = self.trace_id.as_deref().unwrap_or(""),
            job_id = self.job_id.as_deref().unwrap_or(""),
            account_id = self.account_id.as_deref().unwrap_or(""),
            lead_id = self.lead_id.as_deref().unwrap_or(""),
            task_name = self.task_name.as_deref().unwrap_or(""),
        )
    }
}

/// Capture the current trace context (empty when no scope is active)
pub fn current() -> TraceContext {
    CURRENT
        .try_with(|cell| cell.borrow().clone())
        .unwrap_or_default()
}

/// Get the current trace ID
pub fn trace_id() -> Option<String> {
    CURRENT
        .try_with(|cell| cell.borrow().trace_id.clone())
        .unwrap_or_default()
}

/// Get the current job ID
pub fn job_id() -> Option<String> {
    CURRENT
        .try_with(|cell| cell.borrow().job_id.clone())
        .unwrap_or_default()
}

/// Mutate the active scope's bindings. No-op outside a scope.
pub fn update(f: impl FnOnce(&mut TraceContext)) {
    let _ = CURRENT.try_with(|cell| f(&mut cell.borrow_mut()));
}

/// Overwrite the active scope's bindings with a captured snapshot
pub fn restore(snapshot: TraceContext) {
    update(|ctx| *ctx = snapshot);
}

/// Run a future with `ctx` bound as the ambient trace context.
///
/// Prior bindings are restored on every exit path.
pub async fn scope<F: Future>(ctx: TraceContext, fut: F) -> F::Output {
    CURRENT.scope(RefCell::new(ctx), fut).await
}

/// Run a synchronous closure with `ctx` bound (thread-pool offload path)
pub fn sync_scope<T>(ctx: TraceContext, f: impl FnOnce() -> T) -> T {
    CURRENT.sync_scope(RefCell::new(ctx), f)
}

/// Spawn a task that inherits the caller's trace context.
///
/// This is the sanctioned spawn helper: it captures before the hop and
/// restores inside the child frame.
pub fn spawn_traced<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let ctx = current();
    tokio::spawn(scope(ctx, fut))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(trace: &str, job: &str) -> TraceContext {
        TraceContext {
            trace_id: Some(trace.to_string()),
            job_id: Some(job.to_string()),
            ..TraceContext::default()
        }
    }

    #[test]
    fn test_generate_id_unique() {
        assert_ne!(TraceContext::generate_id(), TraceContext::generate_id());
    }

    #[test]
    fn test_current_outside_scope_is_empty() {
        assert_eq!(current(), TraceContext::default());
        assert!(trace_id().is_none());
    }

    #[tokio::test]
    async fn test_scope_binds_and_restores() {
        scope(ctx("t-1", "j-1"), async {
            assert_eq!(trace_id().as_deref(), Some("t-1"));
            assert_eq!(job_id().as_deref(), Some("j-1"));

            // Nested scope shadows, outer restored afterwards
            scope(ctx("t-2", "j-2"), async {
                assert_eq!(trace_id().as_deref(), Some("t-2"));
            })
            .await;
            assert_eq!(trace_id().as_deref(), Some("t-1"));
        })
        .await;
        assert!(trace_id().is_none());
    }

    #[tokio::test]
    async fn test_update_mutates_active_scope() {
        scope(TraceContext::default(), async {
            update(|c| c.account_id = Some("acct-9".into()));
            assert_eq!(current().account_id.as_deref(), Some("acct-9"));
        })
        .await;
    }

    #[tokio::test]
    async fn test_spawn_traced_inherits_context() {
        scope(ctx("t-spawn", "j-spawn"), async {
            let observed = spawn_traced(async { trace_id() }).await.unwrap();
            assert_eq!(observed.as_deref(), Some("t-spawn"));
        })
        .await;
    }

    #[tokio::test]
    async fn test_plain_spawn_loses_context() {
        scope(ctx("t-x", "j-x"), async {
            let observed = tokio::spawn(async { trace_id() }).await.unwrap();
            assert!(observed.is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_context_survives_sleep() {
        scope(ctx("t-sleep", "j-sleep"), async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            assert_eq!(trace_id().as_deref(), Some("t-sleep"));
        })
        .await;
    }

    #[test]
    fn test_sync_scope() {
        let observed = sync_scope(ctx("t-sync", "j-sync"), || trace_id());
        assert_eq!(observed.as_deref(), Some("t-sync"));
        assert!(trace_id().is_none());
    }

    #[test]
    fn test_extract_recognized_fields_only() {
        let payload = json!({
            "trace_id": "t-9",
            "job_id": "j-9",
            "account_id": "a-9",
            "unrelated": "ignored",
            "count": 3,
        });
        let extracted = TraceContext::extract(&payload);
        assert_eq!(extracted.trace_id.as_deref(), Some("t-9"));
        assert_eq!(extracted.job_id.as_deref(), Some("j-9"));
        assert_eq!(extracted.account_id.as_deref(), Some("a-9"));
        assert!(extracted.lead_id.is_none());
        assert!(extracted.task_name.is_none());
    }

    #[test]
    fn test_inject_does_not_overwrite_caller_values() {
        let ctx = ctx("ambient-trace", "ambient-job");
        let payload = json!({"trace_id": "caller-trace", "account_id": null});
        let injected = ctx.inject(&payload);
        // Caller-supplied value wins
        assert_eq!(injected["trace_id"], "caller-trace");
        // Null counts as absent
        assert_eq!(injected["job_id"], "ambient-job");
    }

    #[test]
    fn test_inject_fills_null_fields() {
        let mut ambient = TraceContext::default();
        ambient.account_id = Some("acct-1".into());
        let injected = ambient.inject(&json!({"account_id": null}));
        assert_eq!(injected["account_id"], "acct-1");
    }

    #[test]
    fn test_inject_skips_empty_fields() {
        let injected = TraceContext::default().inject(&json!({"x": 1}));
        assert_eq!(injected, json!({"x": 1}));
    }

    #[test]
    fn test_with_trace_id_generates_when_absent() {
        let generated = TraceContext::with_trace_id(None);
        assert!(generated.trace_id.is_some());

        let seeded = TraceContext::with_trace_id(Some("req-42".into()));
        assert_eq!(seeded.trace_id.as_deref(), Some("req-42"));
    }

    #[test]
    fn test_merged_with_prefers_other() {
        let base = ctx("t-base", "j-base");
        let overlay = TraceContext {
            job_id: Some("j-new".into()),
            ..TraceContext::default()
        };
        let merged = base.merged_with(&overlay);
        assert_eq!(merged.trace_id.as_deref(), Some("t-base"));
        assert_eq!(merged.job_id.as_deref(), Some("j-new"));
    }
}
