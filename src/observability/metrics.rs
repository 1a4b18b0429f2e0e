//! Metric recording helpers
//!
//! Label values come from small fixed sets (status buckets, decision sources,
//! cache outcomes, matched route templates). User ids never appear in labels.

use std::time::Duration;

use metrics::{counter, histogram};

/// Bucket HTTP status codes to control cardinality
pub fn bucket_status_code(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let status = bucket_status_code(status_code);

    counter!(
        "http_request_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// One cache read: `hit`, `miss`, `expired`, `corrupted` or `error`
pub fn record_cache_lookup(outcome: &'static str) {
    counter!("cache_lookup_total", "outcome" => outcome).increment(1);
}

/// One completed entitlement resolution
///
/// `source` is the decision source, or `error` when resolution failed.
pub fn record_access_resolution(source: &'static str, premium: bool, duration: Duration) {
    let result = if premium { "premium" } else { "free" };

    counter!("access_resolution_total", "source" => source, "result" => result).increment(1);
    histogram!("access_resolution_duration_seconds", "source" => source).record(duration.as_secs_f64());

    tracing::debug!(
        source = %source,
        result = %result,
        duration_ms = %duration.as_millis(),
        "Access resolution metrics recorded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::recorder::init_test_metrics;

    #[test]
    fn test_status_code_bucketing() {
        assert_eq!(bucket_status_code(200), "2xx");
        assert_eq!(bucket_status_code(304), "3xx");
        assert_eq!(bucket_status_code(401), "4xx");
        assert_eq!(bucket_status_code(503), "5xx");
        assert_eq!(bucket_status_code(99), "other");
    }

    #[test]
    fn test_access_and_cache_metrics_rendered() {
        let manager = init_test_metrics();

        record_access_resolution("combined", true, Duration::from_millis(12));
        record_cache_lookup("expired");
        record_http_request("GET", "/v1/access", 200, Duration::from_millis(3));

        let output = manager.render();
        assert!(output.contains("access_resolution_total"));
        assert!(output.contains("source=\"combined\""));
        assert!(output.contains("cache_lookup_total"));
        assert!(output.contains("outcome=\"expired\""));
        assert!(output.contains("http_request_total"));
        assert!(output.contains("status=\"2xx\""));
    }
}
