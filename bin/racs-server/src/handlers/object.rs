//! PUT/GET/HEAD/DELETE OBJECT (§4.6).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use md5::Digest;
use racs_common::{BucketName, ObjectKey, RacsError, UserMetadata};
use racs_erasure::{FecMeta, FECMETA_HEADER};
use racs_fanout::FanoutPolicy;
use racs_repository::Repository;

use crate::features::check_unimplemented_features;
use crate::request_id::RequestId;
use crate::state::AppState;
use crate::xml::error_response;

const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// Reserved keys every adapter's `head()` mixes into its returned
/// [`UserMetadata`] alongside the stripped user metadata (§4.1). These
/// are surfaced as plain HTTP headers, never re-prefixed.
const RESERVED_HEAD_KEYS: &[&str] = &["Content-Type", "Content-Length", "Etag", "Last-Modified"];

fn strip_user_metadata(headers: &HeaderMap) -> UserMetadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            name.strip_prefix(USER_METADATA_PREFIX)
                .and_then(|suffix| value.to_str().ok().map(|v| (suffix.to_string(), v.to_string())))
        })
        .collect()
}

fn reprefix_user_metadata(metadata: &UserMetadata, builder: axum::http::response::Builder) -> axum::http::response::Builder {
    reprefix_user_metadata_excluding(metadata, builder, &[])
}

fn reprefix_user_metadata_excluding(
    metadata: &UserMetadata,
    mut builder: axum::http::response::Builder,
    exclude: &[&str],
) -> axum::http::response::Builder {
    for (k, v) in metadata {
        if k.eq_ignore_ascii_case(FECMETA_HEADER) || exclude.iter().any(|e| k.eq_ignore_ascii_case(e)) {
            continue;
        }
        builder = builder.header(format!("{USER_METADATA_PREFIX}{k}"), v);
    }
    builder
}

pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = RequestId::generate();
    if let Some(err) = check_unimplemented_features(&headers, uri.query()) {
        return error_response(&err, &request_id);
    }
    let bucket = BucketName::from(bucket);
    let key = ObjectKey::from(key);

    if let Some(expected) = headers.get("content-md5").and_then(|v| v.to_str().ok()) {
        let mut hasher = md5::Md5::default();
        hasher.update(&body);
        let computed = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, hasher.finalize());
        if computed != expected {
            return error_response(&RacsError::Md5Mismatch, &request_id);
        }
    }

    let (shares, fecmeta) = match state.codec.encode(&body) {
        Ok(v) => v,
        Err(e) => return error_response(&RacsError::from(e), &request_id),
    };

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut user_metadata = strip_user_metadata(&headers);
    user_metadata.insert(FECMETA_HEADER.to_string(), fecmeta.encode());

    let mut lock = match state.coordination.acquire_write_lock(&bucket, &key).await {
        Ok(lock) => lock,
        Err(e) => {
            tracing::warn!(error = %e, "lock acquisition failed, proceeding without coordination");
            racs_coordination::LockGuard::noop()
        }
    };

    // Each active repository is dispatched by its position in this
    // call's candidate list, but the erasure share it receives is
    // chosen by the repository's fixed identity (`share_index`), not by
    // that transient position. A later GET may see a different active
    // subset (a repository disabled in between is the expected fault
    // case), so only an identity-stable mapping lets it recover which
    // share each surviving repository is holding.
    let repos = state.active_repositories_by_priority();
    let total = repos.len();
    let share_indices: Vec<usize> = repos.iter().map(|r| state.share_index(r)).collect();
    let params: Vec<usize> = (0..total).collect();
    let shares = Arc::new(shares);
    let repos_arc = Arc::new(repos);
    let share_indices_arc = Arc::new(share_indices);
    let bucket_arc = Arc::new(bucket.clone());
    let key_arc = Arc::new(key.clone());
    let content_type_arc = Arc::new(content_type);
    let metadata_arc = Arc::new(user_metadata);

    let outcome = racs_fanout::run(
        params,
        FanoutPolicy {
            quorum: total,
            n_concurrent: total.max(1),
            abort_on_exception: true,
        },
        {
            let repos = repos_arc.clone();
            let shares = shares.clone();
            let share_indices = share_indices_arc.clone();
            let bucket = bucket_arc.clone();
            let key = key_arc.clone();
            let content_type = content_type_arc.clone();
            let metadata = metadata_arc.clone();
            let state = state.clone();
            move |idx: usize| {
                let repos = repos.clone();
                let shares = shares.clone();
                let share_idx = share_indices[idx];
                let bucket = bucket.clone();
                let key = key.clone();
                let content_type = content_type.clone();
                let metadata = metadata.clone();
                let state = state.clone();
                async move {
                    state
                        .call_serialized(
                            &repos[idx],
                            repos[idx].put_object(&bucket, &key, Bytes::from(shares[share_idx].clone()), (*content_type).clone(), (*metadata).clone()),
                        )
                        .await
                }
            }
        },
        None::<fn(&usize, &())>,
        None::<fn(&usize, &RacsError)>,
        Some({
            let repos = repos_arc.clone();
            let bucket = bucket_arc.clone();
            let key = key_arc.clone();
            let state = state.clone();
            move |idx: &usize, _: &()| {
                let repos = repos.clone();
                let bucket = (*bucket).clone();
                let key = (*key).clone();
                let idx = *idx;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = state.call_serialized(&repos[idx], repos[idx].delete_object(&bucket, &key)).await {
                        tracing::warn!(error = %e, "rollback delete_object failed");
                    }
                });
            }
        }),
    )
    .await;

    lock.release().await;

    if outcome.quorum_reached {
        let etag = fecmeta.etag();
        ([("etag", etag)], StatusCode::OK).into_response()
    } else {
        let err = outcome
            .exceptions
            .into_values()
            .next()
            .unwrap_or_else(|| RacsError::QuorumUnreachable {
                successes: outcome.results.len(),
                quorum: total,
                total,
            });
        error_response(&err, &request_id)
    }
}

pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request_id = RequestId::generate();
    if let Some(err) = check_unimplemented_features(&headers, uri.query()) {
        return error_response(&err, &request_id);
    }
    let bucket_name = BucketName::from(bucket);
    let key_name = ObjectKey::from(key);

    let mut lock = match state.coordination.acquire_read_lock(&bucket_name, &key_name).await {
        Ok(lock) => lock,
        Err(e) => {
            tracing::warn!(error = %e, "lock acquisition failed, proceeding without coordination");
            racs_coordination::LockGuard::noop()
        }
    };

    let ordered = state.active_repositories_by_priority();
    let candidates = match state.read_policy {
        racs_common::ReadPolicy::Latency => ordered,
        racs_common::ReadPolicy::Bandwidth => ordered.into_iter().take(state.k as usize).collect(),
    };

    let k = state.k as usize;
    let total = candidates.len();
    let share_indices: Vec<usize> = candidates.iter().map(|r| state.share_index(r)).collect();
    let params: Vec<usize> = (0..total).collect();
    let repos_arc = Arc::new(candidates);
    let bucket_arc = Arc::new(bucket_name.clone());
    let key_arc = Arc::new(key_name.clone());

    let outcome = racs_fanout::run(
        params,
        FanoutPolicy {
            quorum: k,
            n_concurrent: total.max(1),
            abort_on_exception: false,
        },
        {
            let repos = repos_arc.clone();
            let bucket = bucket_arc.clone();
            let key = key_arc.clone();
            let state = state.clone();
            move |idx: usize| {
                let repos = repos.clone();
                let bucket = bucket.clone();
                let key = key.clone();
                let state = state.clone();
                async move { state.call_serialized(&repos[idx], repos[idx].get_object(&bucket, &key)).await }
            }
        },
        None::<fn(&usize, &(bytes::Bytes, Option<String>, UserMetadata))>,
        None::<fn(&usize, &RacsError)>,
        None::<fn(&usize, &(bytes::Bytes, Option<String>, UserMetadata))>,
    )
    .await;

    lock.release().await;

    if !outcome.quorum_reached {
        let err = outcome
            .exceptions
            .into_values()
            .next()
            .unwrap_or_else(|| RacsError::QuorumUnreachable {
                successes: outcome.results.len(),
                quorum: k,
                total,
            });
        return error_response(&err, &request_id);
    }

    let mut results: Vec<_> = outcome.results.into_iter().collect();
    results.sort_by_key(|(idx, _)| *idx);
    results.truncate(k);

    let Some((_, (_, _, first_metadata))) = results.first() else {
        return error_response(&RacsError::NotFound { bucket: bucket_name.as_str().to_string(), key: key_name.as_str().to_string() }, &request_id);
    };
    let fecmeta = match first_metadata.get(FECMETA_HEADER).map(|s| FecMeta::decode(s)) {
        Some(Ok(fm)) => fm,
        _ => return error_response(&RacsError::DecodeVerifyFailed("missing or malformed fecmeta".to_string()), &request_id),
    };

    let mut shares: Vec<Option<Vec<u8>>> = vec![None; state.codec.m() as usize];
    for (idx, (data, _, _)) in &results {
        let share_idx = share_indices[*idx];
        if share_idx < shares.len() {
            shares[share_idx] = Some(data.to_vec());
        }
    }

    let body = match state.codec.decode(&mut shares, &fecmeta) {
        Ok(b) => bytes::Bytes::from(b),
        Err(e) => return error_response(&RacsError::from(e), &request_id),
    };

    let total = body.len() as u64;
    let range = headers.get("range").and_then(|v| v.to_str().ok()).and_then(|r| slice_range(&body, r));
    let (status, body) = match &range {
        Some((sliced, _, _)) => (StatusCode::PARTIAL_CONTENT, sliced.clone()),
        None => (StatusCode::OK, body),
    };

    let content_type = results.first().and_then(|(_, (_, ct, _))| ct.clone());
    let mut builder = Response::builder()
        .status(status)
        .header("etag", fecmeta.etag())
        .header("content-length", body.len().to_string())
        .header("x-amz-request-id", &request_id.request_id)
        .header("x-amz-id-2", &request_id.id2);
    if let Some((_, start, end)) = range {
        builder = builder.header("content-range", format!("bytes {start}-{end}/{total}"));
    }
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    builder = reprefix_user_metadata(first_metadata, builder);

    builder.body(axum::body::Body::from(body)).expect("response builder invariants upheld")
}

/// HEAD OBJECT's fan-out: quorum=1, n_concurrent=1 serial fallback
/// across `repos` (§4.6). A per-repo `NotFound` is folded into `Ok(None)`
/// so the executor doesn't treat "this repo doesn't have it" as a
/// failure worth counting against quorum; `Ok(None)` at the end means
/// every queried repo agreed the object is absent. Shared with the
/// listing handler's per-entry enrichment fallback (§4.6, Open
/// Question 3).
pub async fn fanout_head(
    state: &Arc<AppState>,
    bucket: &BucketName,
    key: &ObjectKey,
    repos: Vec<Arc<dyn Repository>>,
) -> racs_common::Result<Option<UserMetadata>> {
    let total = repos.len();
    let params: Vec<usize> = (0..total).collect();
    let repos_arc = Arc::new(repos);
    let bucket_arc = Arc::new(bucket.clone());
    let key_arc = Arc::new(key.clone());

    let outcome = racs_fanout::run(
        params,
        FanoutPolicy {
            quorum: 1,
            n_concurrent: 1,
            abort_on_exception: false,
        },
        {
            let repos = repos_arc.clone();
            let bucket = bucket_arc.clone();
            let key = key_arc.clone();
            let state = state.clone();
            move |idx: usize| {
                let repos = repos.clone();
                let bucket = bucket.clone();
                let key = key.clone();
                let state = state.clone();
                async move {
                    match state.call_serialized(&repos[idx], repos[idx].head(&bucket, &key)).await {
                        Ok(h) => Ok(Some(h)),
                        Err(e) if e.is_not_found() => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            }
        },
        None::<fn(&usize, &Option<UserMetadata>)>,
        None::<fn(&usize, &RacsError)>,
        None::<fn(&usize, &Option<UserMetadata>)>,
    )
    .await;

    if !outcome.quorum_reached {
        return Err(RacsError::QuorumUnreachable {
            successes: outcome.results.len(),
            quorum: 1,
            total,
        });
    }

    Ok(outcome.results.values().find_map(|h| h.clone()))
}

pub async fn head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request_id = RequestId::generate();
    if let Some(err) = check_unimplemented_features(&headers, uri.query()) {
        return error_response(&err, &request_id);
    }
    let bucket_name = BucketName::from(bucket);
    let key_name = ObjectKey::from(key);

    let active = state.active_repositories_by_priority();
    let headers_found = match fanout_head(&state, &bucket_name, &key_name, active).await {
        Ok(Some(h)) => h,
        Ok(None) => {
            return error_response(
                &RacsError::NotFound {
                    bucket: bucket_name.as_str().to_string(),
                    key: key_name.as_str().to_string(),
                },
                &request_id,
            )
        }
        Err(e) => return error_response(&e, &request_id),
    };

    let fecmeta = headers_found.get(FECMETA_HEADER).and_then(|s| FecMeta::decode(s).ok());
    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(fm) = &fecmeta {
        builder = builder.header("etag", fm.etag()).header("content-length", fm.size.to_string());
    }
    if let Some(ct) = headers_found.get("Content-Type") {
        builder = builder.header("content-type", ct);
    }
    if let Some(lm) = headers_found.get("Last-Modified") {
        builder = builder.header("last-modified", lm);
    }
    builder = reprefix_user_metadata_excluding(&headers_found, builder, RESERVED_HEAD_KEYS);
    builder.body(axum::body::Body::empty()).expect("response builder invariants upheld")
}

pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request_id = RequestId::generate();
    if let Some(err) = check_unimplemented_features(&headers, uri.query()) {
        return error_response(&err, &request_id);
    }
    let bucket_name = BucketName::from(bucket);
    let key_name = ObjectKey::from(key);

    let active = state.active_repositories_by_priority();
    let total = active.len();
    let params: Vec<usize> = (0..total).collect();
    let repos_arc = Arc::new(active);
    let bucket_arc = Arc::new(bucket_name.clone());
    let key_arc = Arc::new(key_name.clone());

    let outcome = racs_fanout::run(
        params,
        FanoutPolicy {
            quorum: total,
            n_concurrent: total.max(1),
            abort_on_exception: false,
        },
        {
            let repos = repos_arc.clone();
            let bucket = bucket_arc.clone();
            let key = key_arc.clone();
            let state = state.clone();
            move |idx: usize| {
                let repos = repos.clone();
                let bucket = bucket.clone();
                let key = key.clone();
                let state = state.clone();
                async move { state.call_serialized(&repos[idx], repos[idx].delete_object(&bucket, &key)).await }
            }
        },
        None::<fn(&usize, &())>,
        None::<fn(&usize, &RacsError)>,
        None::<fn(&usize, &())>,
    )
    .await;

    state.head_cache.invalidate(&bucket_name, &key_name);

    if outcome.quorum_reached {
        StatusCode::NO_CONTENT.into_response()
    } else {
        let err = outcome
            .exceptions
            .into_values()
            .next()
            .unwrap_or_else(|| RacsError::QuorumUnreachable {
                successes: outcome.results.len(),
                quorum: total,
                total,
            });
        error_response(&err, &request_id)
    }
}

/// Slices `body` per a `Range: bytes=...` header, returning the slice
/// together with the inclusive `start`/`end` byte offsets it covers (for
/// the response's `Content-Range` header). Returns `None` for a malformed
/// or unsatisfiable range, in which case the caller falls back to serving
/// the full body with a `200 OK`.
fn slice_range(body: &bytes::Bytes, range_header: &str) -> Option<(bytes::Bytes, u64, u64)> {
    let spec = range_header.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;
    let total = body.len() as u64;
    let (start, end) = if start_s.is_empty() {
        let suffix: u64 = end_s.parse().ok()?;
        let suffix = suffix.min(total);
        (total - suffix, total - 1)
    } else {
        let start: u64 = start_s.parse().ok()?;
        let end = if end_s.is_empty() {
            total.saturating_sub(1)
        } else {
            end_s.parse::<u64>().ok()?.min(total.saturating_sub(1))
        };
        (start, end)
    };
    if start > end || start >= total {
        return None;
    }
    Some((body.slice(start as usize..=end as usize), start, end))
}
