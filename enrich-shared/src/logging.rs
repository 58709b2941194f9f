//! # Logging Bootstrap
//!
//! Tracing subscriber initialization for binaries and tests. The threshold
//! comes from `LOG_LEVEL` (falling back to `RUST_LOG`, then `info`);
//! `LOG_FORMAT=json` switches to newline-delimited JSON for log collectors.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Idempotent: repeated calls (tests, embedded use) are ignored.
pub fn init_tracing() {
    let filter = env_filter();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };

    // Already-set subscriber is fine (e.g. test harness initialized first)
    let _ = result;
}

fn env_filter() -> EnvFilter {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        if let Ok(filter) = EnvFilter::try_new(level.to_lowercase()) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_filter_from_log_level() {
        std::env::set_var("LOG_LEVEL", "DEBUG");
        let filter = env_filter();
        assert_eq!(filter.to_string(), "debug");
        std::env::remove_var("LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_filter_default() {
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("RUST_LOG");
        let filter = env_filter();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    #[serial]
    fn test_init_tracing_idempotent() {
        init_tracing();
        init_tracing();
    }
}
