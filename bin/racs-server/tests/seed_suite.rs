//! Cross-component end-to-end scenarios (§8 seed suite), driven
//! through the real axum router with filesystem-backed repositories in
//! a `tempfile` fixture, using `tower::ServiceExt::oneshot` so no
//! listener needs to be bound.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use racs_common::config::{Config, RacsConfig, RepositoryClass, RepositoryConfig};
use racs_common::ReadPolicy;
use racs_server::state::AppState;
use tower::ServiceExt;

/// One filesystem repository per tempdir, `k`-of-`m` erasure parameters.
struct Fixture {
    router: Router,
    _dirs: Vec<tempfile::TempDir>,
}

fn build_fixture(k: u8, m: u8, read_policy: ReadPolicy) -> Fixture {
    build_fixture_with_inactive(k, m, read_policy, &[])
}

/// Like [`build_fixture`], but marks the repositories at `inactive`
/// (0-indexed into the `m`-long repository list) as `active = false`
/// from startup, so `m` — and therefore the share count — still
/// covers every configured repository regardless of which ones are
/// active (a repository's `share_index` is its fixed position in the
/// full list, not its position among active repositories).
fn build_fixture_with_inactive(k: u8, m: u8, read_policy: ReadPolicy, inactive: &[usize]) -> Fixture {
    let dirs: Vec<tempfile::TempDir> = (0..m).map(|_| tempfile::tempdir().unwrap()).collect();
    let repositories = dirs
        .iter()
        .enumerate()
        .map(|(i, dir)| RepositoryConfig {
            name: format!("fs{i}"),
            class: RepositoryClass::Fs,
            active: !inactive.contains(&i),
            priority: i32::try_from(i).unwrap(),
            base_directory: Some(dir.path().to_string_lossy().to_string()),
            endpoint: None,
            access_key: None,
            secret_key: None,
            bucket_prefix: None,
            username: None,
            api_key: None,
            container_prefix: None,
        })
        .collect();

    let config = Config {
        racs: RacsConfig {
            k,
            host: "127.0.0.1".to_string(),
            port: 0,
            m: Some(m),
            proxy_host: None,
            proxy_port: None,
            minimize_latency_or_bandwidth: read_policy,
            verify_listings_consistent: false,
            logfile: None,
            unit_test_repositories: true,
            use_zookeeper: false,
            record_stats: false,
        },
        repositories,
        zookeeper: None,
    };
    config.validate().expect("fixture config must be valid");

    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
    let state = Arc::new(AppState::build(&config, metrics_handle).unwrap());
    let router = racs_server::router::build_router(state);

    Fixture { router, _dirs: dirs }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

fn create_bucket_req(bucket: &str) -> Request<Body> {
    Request::builder().method("PUT").uri(format!("/{bucket}")).body(Body::empty()).unwrap()
}

const LOREM_IPSUM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.";

#[tokio::test]
async fn small_object_round_trips_and_delete_bucket_conflicts() {
    let fx = build_fixture(3, 3, ReadPolicy::Latency);
    let bucket = "racs_unittest_bucket";

    let (status, _, _) = send(&fx.router, create_bucket_req(bucket)).await;
    assert_eq!(status, StatusCode::OK);

    let put_req = Request::builder()
        .method("PUT")
        .uri(format!("/{bucket}/test_key_small"))
        .header("content-type", "text/plain")
        .body(Body::from(LOREM_IPSUM))
        .unwrap();
    let (status, headers, _) = send(&fx.router, put_req).await;
    assert_eq!(status, StatusCode::OK);
    let put_etag = headers.get("etag").unwrap().to_str().unwrap().to_string();

    let get_req = Request::builder().method("GET").uri(format!("/{bucket}/test_key_small")).body(Body::empty()).unwrap();
    let (status, headers, body) = send(&fx.router, get_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), LOREM_IPSUM.as_bytes());
    assert_eq!(headers.get("etag").unwrap().to_str().unwrap(), put_etag);
    assert_eq!(headers.get("content-type").unwrap().to_str().unwrap(), "text/plain");

    let head_req = Request::builder().method("HEAD").uri(format!("/{bucket}/test_key_small")).body(Body::empty()).unwrap();
    let (status, headers, body) = send(&fx.router, head_req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(headers.get("etag").unwrap().to_str().unwrap(), put_etag);
    assert_eq!(headers.get("content-length").unwrap().to_str().unwrap(), LOREM_IPSUM.len().to_string());
    assert!(headers.get("last-modified").is_some());
    assert_eq!(headers.get("content-type").unwrap().to_str().unwrap(), "text/plain");

    // DELETE BUCKET before DELETE OBJECT must fail with 409 BucketNotEmpty.
    let del_bucket_req = Request::builder().method("DELETE").uri(format!("/{bucket}")).body(Body::empty()).unwrap();
    let (status, _, _) = send(&fx.router, del_bucket_req).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let del_obj_req = Request::builder().method("DELETE").uri(format!("/{bucket}/test_key_small")).body(Body::empty()).unwrap();
    let (status, _, _) = send(&fx.router, del_obj_req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let del_bucket_req = Request::builder().method("DELETE").uri(format!("/{bucket}")).body(Body::empty()).unwrap();
    let (status, _, _) = send(&fx.router, del_bucket_req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn big_object_round_trips_with_md5_etag() {
    let fx = build_fixture(3, 3, ReadPolicy::Latency);
    let bucket = "bigobjects";
    send(&fx.router, create_bucket_req(bucket)).await;

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 256) as u8).collect();
    let mut hasher = md5::Md5::default();
    use md5::Digest;
    hasher.update(&payload);
    let expected_etag = format!("\"{}\"", hex::encode(hasher.finalize()));

    let put_req = Request::builder().method("PUT").uri(format!("/{bucket}/big_key")).body(Body::from(payload.clone())).unwrap();
    let (status, headers, _) = send(&fx.router, put_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("etag").unwrap().to_str().unwrap(), expected_etag);

    let get_req = Request::builder().method("GET").uri(format!("/{bucket}/big_key")).body(Body::empty()).unwrap();
    let (status, headers, body) = send(&fx.router, get_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), payload.len());
    assert_eq!(body.as_ref(), payload.as_slice());
    assert_eq!(headers.get("etag").unwrap().to_str().unwrap(), expected_etag);
}

#[tokio::test]
async fn ranged_get_returns_206_with_matching_content_length() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let bucket = "rangedobjects";
    send(&fx.router, create_bucket_req(bucket)).await;

    let payload = b"0123456789abcdefghijklmnopqrstuvwxyz".to_vec();
    let put_req = Request::builder().method("PUT").uri(format!("/{bucket}/rk")).body(Body::from(payload.clone())).unwrap();
    let (status, _, _) = send(&fx.router, put_req).await;
    assert_eq!(status, StatusCode::OK);

    let get_req = Request::builder()
        .method("GET")
        .uri(format!("/{bucket}/rk"))
        .header("range", "bytes=5-9")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&fx.router, get_req).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body.as_ref(), &payload[5..=9]);
    assert_eq!(headers.get("content-length").unwrap().to_str().unwrap(), body.len().to_string());
    assert_eq!(headers.get("content-range").unwrap().to_str().unwrap(), format!("bytes 5-9/{}", payload.len()));
}

#[tokio::test]
async fn prefix_listing_returns_only_matching_keys() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let bucket = "listingbucket";
    send(&fx.router, create_bucket_req(bucket)).await;

    for key in ["fookey1", "fookey2", "fookey3", "nonfoo1", "nonfoo2"] {
        let req = Request::builder().method("PUT").uri(format!("/{bucket}/{key}")).body(Body::from("x")).unwrap();
        let (status, _, _) = send(&fx.router, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    let list_req = Request::builder().method("GET").uri(format!("/{bucket}?prefix=foo")).body(Body::empty()).unwrap();
    let (status, _, body) = send(&fx.router, list_req).await;
    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8(body.to_vec()).unwrap();

    for expected in ["fookey1", "fookey2", "fookey3"] {
        assert!(xml.contains(expected), "listing XML missing {expected}: {xml}");
    }
    for unexpected in ["nonfoo1", "nonfoo2"] {
        assert!(!xml.contains(unexpected), "listing XML unexpectedly contains {unexpected}: {xml}");
    }
    assert!(!xml.contains("<CommonPrefixes>"), "no delimiter was given, so no CommonPrefixes expected: {xml}");
}

#[tokio::test]
async fn fault_tolerance_survives_one_disabled_repository() {
    let fx = build_fixture(2, 3, ReadPolicy::Latency);
    let bucket = "faulttolerant";
    send(&fx.router, create_bucket_req(bucket)).await;

    let payload = b"tolerate one failure out of three backends".to_vec();
    let mut hasher = md5::Md5::default();
    use md5::Digest;
    hasher.update(&payload);
    let expected_etag = format!("\"{}\"", hex::encode(hasher.finalize()));

    let put_req = Request::builder().method("PUT").uri(format!("/{bucket}/fk")).body(Body::from(payload.clone())).unwrap();
    let (status, _, _) = send(&fx.router, put_req).await;
    assert_eq!(status, StatusCode::OK);

    // Disable one of the three repositories through the admin surface,
    // exactly as an operator would, then confirm GET still succeeds.
    let admin_req = Request::builder().method("GET").uri("/racs?cmd=toggle_active&repo=fs0").body(Body::empty()).unwrap();
    let (status, _, _) = send(&fx.router, admin_req).await;
    assert_eq!(status, StatusCode::OK);

    let get_req = Request::builder().method("GET").uri(format!("/{bucket}/fk")).body(Body::empty()).unwrap();
    let (status, headers, body) = send(&fx.router, get_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), payload.as_slice());
    assert_eq!(headers.get("etag").unwrap().to_str().unwrap(), expected_etag);
}

#[tokio::test]
async fn put_succeeds_with_a_non_trailing_inactive_repository() {
    // fs0 is inactive and is NOT the last repository in the configured
    // list: the two surviving active repositories (fs1, fs2) hold
    // share indices 1 and 2 into an m=3 share set, not 0 and 1. A share
    // set sized to the active count instead of the full configured
    // count would panic this PUT out of bounds.
    let fx = build_fixture_with_inactive(2, 3, ReadPolicy::Latency, &[0]);
    let bucket = "noncontiguous";
    send(&fx.router, create_bucket_req(bucket)).await;

    let payload = b"active repositories need not be a prefix of the list".to_vec();
    let put_req = Request::builder().method("PUT").uri(format!("/{bucket}/k")).body(Body::from(payload.clone())).unwrap();
    let (status, _, _) = send(&fx.router, put_req).await;
    assert_eq!(status, StatusCode::OK);

    let get_req = Request::builder().method("GET").uri(format!("/{bucket}/k")).body(Body::empty()).unwrap();
    let (status, _, body) = send(&fx.router, get_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), payload.as_slice());
}

#[tokio::test]
async fn metadata_and_content_type_survive_a_round_trip() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let bucket = "metabucket";
    send(&fx.router, create_bucket_req(bucket)).await;

    let put_req = Request::builder()
        .method("PUT")
        .uri(format!("/{bucket}/metakey"))
        .header("content-type", "app/x-racs-test")
        .header("x-amz-meta-foo", "test foo value")
        .header("x-amz-meta-bar", "test bar value")
        .body(Body::from("payload"))
        .unwrap();
    let (status, _, _) = send(&fx.router, put_req).await;
    assert_eq!(status, StatusCode::OK);

    let get_req = Request::builder().method("GET").uri(format!("/{bucket}/metakey")).body(Body::empty()).unwrap();
    let (status, headers, body) = send(&fx.router, get_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"payload");
    assert_eq!(headers.get("content-type").unwrap().to_str().unwrap(), "app/x-racs-test");
    assert_eq!(headers.get("x-amz-meta-foo").unwrap().to_str().unwrap(), "test foo value");
    assert_eq!(headers.get("x-amz-meta-bar").unwrap().to_str().unwrap(), "test bar value");
    // The fecmeta header is internal and must never leak to the client.
    assert!(headers.get("x-amz-meta-x-racs-fecmeta").is_none());
}

#[tokio::test]
async fn zero_byte_object_round_trips() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let bucket = "zerobyte";
    send(&fx.router, create_bucket_req(bucket)).await;

    let put_req = Request::builder().method("PUT").uri(format!("/{bucket}/empty")).body(Body::empty()).unwrap();
    let (status, headers, _) = send(&fx.router, put_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("etag").unwrap().to_str().unwrap(), "\"d41d8cd98f00b204e9800998ecf8427e\"");

    let get_req = Request::builder().method("GET").uri(format!("/{bucket}/empty")).body(Body::empty()).unwrap();
    let (status, headers, body) = send(&fx.router, get_req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(headers.get("content-length").unwrap().to_str().unwrap(), "0");
}

#[tokio::test]
async fn delete_of_nonexistent_key_is_idempotent() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let bucket = "idempotentdelete";
    send(&fx.router, create_bucket_req(bucket)).await;

    let del_req = Request::builder().method("DELETE").uri(format!("/{bucket}/never_existed")).body(Body::empty()).unwrap();
    let (status, _, _) = send(&fx.router, del_req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn delete_of_nonexistent_bucket_is_not_found() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let del_req = Request::builder().method("DELETE").uri("/never_created").body(Body::empty()).unwrap();
    let (status, _, _) = send(&fx.router, del_req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn creating_an_existing_bucket_is_a_silent_success() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let bucket = "recreateme";
    let (status, _, _) = send(&fx.router, create_bucket_req(bucket)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&fx.router, create_bucket_req(bucket)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn content_md5_mismatch_is_rejected() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let bucket = "md5check";
    send(&fx.router, create_bucket_req(bucket)).await;

    let req = Request::builder()
        .method("PUT")
        .uri(format!("/{bucket}/k"))
        .header("content-md5", "not-a-real-digest")
        .body(Body::from("some bytes"))
        .unwrap();
    let (status, _, _) = send(&fx.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_of_missing_object_is_not_found() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let bucket = "missingobj";
    send(&fx.router, create_bucket_req(bucket)).await;

    let req = Request::builder().method("GET").uri(format!("/{bucket}/nope")).body(Body::empty()).unwrap();
    let (status, _, _) = send(&fx.router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn post_is_always_not_implemented() {
    let fx = build_fixture(2, 2, ReadPolicy::Latency);
    let req = Request::builder().method("POST").uri("/whatever").body(Body::empty()).unwrap();
    let (status, _, _) = send(&fx.router, req).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}
