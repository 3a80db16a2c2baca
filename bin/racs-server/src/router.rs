//! Route table and the virtual-hosted-to-path-style rewrite (§6).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use racs_common::RacsError;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, bucket, object};
use crate::metrics::metrics_layer;
use crate::request_id::RequestId;
use crate::state::AppState;
use crate::xml::error_response;

/// POST is recognized but never implemented (§6): any POST route maps
/// here and returns 501, distinct from the 500s `features::check_unimplemented_features`
/// produces for a recognized GET/PUT/DELETE/HEAD feature.
async fn not_implemented() -> Response {
    error_response(&RacsError::NotImplemented("POST".to_string()), &RequestId::generate())
}

/// Rewrites virtual-hosted requests (`Host: <bucket>.s3.amazonaws.com`)
/// into path-style ones (`/<bucket>/...`) before routing, so every
/// handler below only ever sees path-style URIs (§6).
pub async fn virtual_host_rewrite(mut request: Request<Body>, next: Next) -> Response {
    let Some(host) = request.headers().get(axum::http::header::HOST).and_then(|h| h.to_str().ok()) else {
        return next.run(request).await;
    };

    if let Some(bucket) = host.strip_suffix(".s3.amazonaws.com") {
        let bucket = bucket.to_string();
        let original = request.uri();
        let path_and_query = original.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let rest = path_and_query.strip_prefix('/').unwrap_or(path_and_query);
        let new_path = if rest.is_empty() {
            format!("/{bucket}")
        } else {
            format!("/{bucket}/{rest}")
        };
        if let Ok(new_uri) = Uri::try_from(new_path) {
            *request.uri_mut() = new_uri;
        }
    }

    next.run(request).await
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics_snapshot(),
    )
        .into_response()
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_endpoint))
        .route("/racs", get(admin::admin_page))
        .route("/", get(bucket::list_buckets).post(not_implemented))
        .route(
            "/{bucket}",
            get(bucket::list_bucket_contents)
                .put(bucket::create_bucket)
                .delete(bucket::delete_bucket)
                .post(not_implemented),
        )
        .route(
            "/{bucket}/{*key}",
            get(object::get_object)
                .put(object::put_object)
                .delete(object::delete_object)
                .head(object::head_object)
                .post(not_implemented),
        )
        .layer(middleware::from_fn(metrics_layer))
        .layer(middleware::from_fn(virtual_host_rewrite))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
