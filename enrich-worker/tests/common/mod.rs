//! Shared helpers for service-level tests.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;

use enrich_shared::envelope::CallbackEnvelope;

/// Issue a JSON request against the router and decode the response body
pub async fn send_json(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Receive the next delivered envelope, failing the test after 10 s
pub async fn recv_envelope(rx: &mut UnboundedReceiver<CallbackEnvelope>) -> CallbackEnvelope {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("receiver channel closed")
}

/// Drain envelopes until a terminal one for `job_id` arrives; returns all
/// observed envelopes for that job in order, terminal last.
pub async fn collect_until_terminal(
    rx: &mut UnboundedReceiver<CallbackEnvelope>,
    job_id: &str,
) -> Vec<CallbackEnvelope> {
    let mut observed = Vec::new();
    loop {
        let envelope = recv_envelope(rx).await;
        if envelope.job_id != job_id {
            continue;
        }
        let terminal = envelope.is_terminal();
        let last_page = envelope
            .pagination
            .as_ref()
            .map(|p| p.page == p.total_pages)
            .unwrap_or(true);
        observed.push(envelope);
        if terminal && last_page {
            return observed;
        }
    }
}
