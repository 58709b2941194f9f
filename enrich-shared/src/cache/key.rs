//! # Cache Key Computation
//!
//! Content-addressed fingerprints for cached requests. Secret headers are
//! stripped before hashing so the key is independent of credential values,
//! and the canonical form serializes with sorted keys (serde_json objects
//! are BTree-backed here) so equivalent requests always collide.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Header names excluded from fingerprinting (compared case-insensitively)
pub const SECRET_HEADERS: [&str; 3] = ["authorization", "api-key", "x-api-key"];

/// Copy of `headers` with credential headers removed
pub fn strip_secret_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| {
            !SECRET_HEADERS
                .iter()
                .any(|secret| name.eq_ignore_ascii_case(secret))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// SHA-256 hex digest of a canonical JSON value
pub fn fingerprint(value: &Value) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Cache key for an external API request.
///
/// The HTTP method is recorded with the entry but does not participate in
/// the key; matching the upstream contract, a GET and POST to the same URL
/// with the same params share an entry.
pub fn response_cache_key(
    url: &str,
    params: &Value,
    headers: &BTreeMap<String, String>,
) -> String {
    let cache_headers = strip_secret_headers(headers);
    fingerprint(&json!({
        "url": url,
        "params": params,
        "headers": cache_headers,
    }))
}

/// Cache key for an LLM completion
pub fn completion_cache_key(
    model: &str,
    prompt: &str,
    schema: Option<&Value>,
    temperature: f64,
    tenant_id: Option<&str>,
) -> String {
    let schema_fingerprint = schema.map(fingerprint);
    fingerprint(&json!({
        "model": model,
        "prompt": prompt,
        "schema": schema_fingerprint,
        "temperature": temperature,
        "tenant": tenant_id,
    }))
}
