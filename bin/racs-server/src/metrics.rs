//! Prometheus metrics (§6, §9: "Statistics").
//!
//! The recorder installs once at startup; every request is counted and
//! timed through the `metrics` facade rather than a parallel ad hoc
//! counter table, so `/metrics` and the admin stats dump always agree.

use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the process-global Prometheus recorder. Must be called
/// exactly once; `main` does this before building [`crate::state::AppState`].
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder installs exactly once per process")
}

fn operation_name(method: &Method, path: &str) -> &'static str {
    let path = path.trim_start_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match (method, segments.as_slice()) {
        (m, []) if *m == Method::GET => "list_buckets",
        (m, [_]) if *m == Method::GET => "list_bucket",
        (m, [_]) if *m == Method::PUT => "create_bucket",
        (m, [_]) if *m == Method::DELETE => "delete_bucket",
        (m, [_, ..]) if *m == Method::GET => "get_object",
        (m, [_, ..]) if *m == Method::PUT => "put_object",
        (m, [_, ..]) if *m == Method::HEAD => "head_object",
        (m, [_, ..]) if *m == Method::DELETE => "delete_object",
        _ => "other",
    }
}

/// Records a request counter and a latency histogram per operation,
/// tagged with the response status. Excludes the admin/metrics
/// surface itself so it doesn't inflate its own counters.
pub async fn metrics_layer(request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if path == "/metrics" || path == "/racs" {
        return next.run(request).await;
    }
    let op = operation_name(request.method(), &path);
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!("racs_requests_total", "operation" => op, "status" => status).increment(1);
    metrics::histogram!("racs_request_duration_seconds", "operation" => op).record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_object_and_bucket_paths() {
        assert_eq!(operation_name(&Method::GET, "/"), "list_buckets");
        assert_eq!(operation_name(&Method::PUT, "/b"), "create_bucket");
        assert_eq!(operation_name(&Method::DELETE, "/b"), "delete_bucket");
        assert_eq!(operation_name(&Method::GET, "/b"), "list_bucket");
        assert_eq!(operation_name(&Method::PUT, "/b/k"), "put_object");
        assert_eq!(operation_name(&Method::GET, "/b/a/b/c"), "get_object");
        assert_eq!(operation_name(&Method::HEAD, "/b/k"), "head_object");
        assert_eq!(operation_name(&Method::DELETE, "/b/k"), "delete_object");
    }
}
