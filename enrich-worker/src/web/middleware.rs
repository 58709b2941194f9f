//! Request middleware: seeds the trace scope from `X-Request-ID` and logs
//! request start/completion. Sensitive headers never reach the logs.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info, Instrument};

use enrich_shared::trace::{self, TraceContext};

const SENSITIVE_HEADERS: [&str; 2] = ["authorization", "cookie"];

/// Bind a trace scope for the whole request and log its lifecycle
pub async fn trace_requests(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ctx = TraceContext::with_trace_id(request_id);

    let method = request.method().clone();
    let uri = request.uri().clone();
    let header_names: Vec<String> = request
        .headers()
        .keys()
        .map(|name| name.as_str().to_string())
        .filter(|name| !SENSITIVE_HEADERS.contains(&name.as_str()))
        .collect();

    let span = ctx.span("http_request");
    trace::scope(ctx, async move {
        info!(
            method = %method,
            url = %uri,
            headers = header_names.join(","),
            "Request started"
        );
        let start = Instant::now();

        let response = next.run(request).await;

        info!(
            status_code = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    })
    .instrument(span)
    .await
}
