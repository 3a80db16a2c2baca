//! CREATE/DELETE BUCKET, LIST BUCKETS, LIST BUCKET CONTENTS (§4.6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, StreamExt};
use racs_common::{BucketName, ObjectKey, RacsError};
use racs_erasure::{FecMeta, FECMETA_HEADER};
use racs_fanout::FanoutPolicy;
use racs_repository::{ObjectMetaData, Repository};
use serde::Deserialize;

use crate::features::check_unimplemented_features;
use crate::handlers::object::fanout_head;
use crate::request_id::RequestId;
use crate::state::AppState;
use crate::xml::{error_response, xml_response, Bucket, Buckets, CommonPrefix, ListBucketResult, ListBucketsResult, ObjectContent, Owner};

/// Bound on concurrent per-entry HEAD enrichment, matching the
/// fan-out executor's own default worker-pool size (§5, §9 Open
/// Question 3).
const HEAD_ENRICHMENT_CONCURRENCY: usize = 15;

const PLACEHOLDER_CREATION_DATE: &str = "1970-01-01T00:00:00.000Z";

pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request_id = RequestId::generate();
    if let Some(err) = check_unimplemented_features(&headers, uri.query()) {
        return error_response(&err, &request_id);
    }
    let bucket_name = BucketName::from(bucket);

    let repos = state.active_repositories_by_priority();
    let total = repos.len();
    let params: Vec<usize> = (0..total).collect();
    let repos_arc = Arc::new(repos);
    let bucket_arc = Arc::new(bucket_name.clone());

    let outcome = racs_fanout::run(
        params,
        FanoutPolicy {
            quorum: total,
            n_concurrent: total.max(1),
            abort_on_exception: true,
        },
        {
            let repos = repos_arc.clone();
            let bucket = bucket_arc.clone();
            let state = state.clone();
            move |idx: usize| {
                let repos = repos.clone();
                let bucket = bucket.clone();
                let state = state.clone();
                async move { state.call_serialized(&repos[idx], repos[idx].create_bucket(&bucket)).await }
            }
        },
        None::<fn(&usize, &())>,
        None::<fn(&usize, &RacsError)>,
        Some({
            let repos = repos_arc.clone();
            let bucket = bucket_arc.clone();
            let state = state.clone();
            move |idx: &usize, _: &()| {
                let repos = repos.clone();
                let bucket = (*bucket).clone();
                let idx = *idx;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = state.call_serialized(&repos[idx], repos[idx].delete_bucket(&bucket)).await {
                        tracing::warn!(error = %e, "rollback delete_bucket failed");
                    }
                });
            }
        }),
    )
    .await;

    if outcome.quorum_reached {
        StatusCode::OK.into_response()
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

pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request_id = RequestId::generate();
    if let Some(err) = check_unimplemented_features(&headers, uri.query()) {
        return error_response(&err, &request_id);
    }
    let bucket_name = BucketName::from(bucket);

    let repos = state.active_repositories_by_priority();
    let total = repos.len();
    let params: Vec<usize> = (0..total).collect();
    let repos_arc = Arc::new(repos);
    let bucket_arc = Arc::new(bucket_name);

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
            let state = state.clone();
            move |idx: usize| {
                let repos = repos.clone();
                let bucket = bucket.clone();
                let state = state.clone();
                async move { state.call_serialized(&repos[idx], repos[idx].delete_bucket(&bucket)).await }
            }
        },
        None::<fn(&usize, &())>,
        None::<fn(&usize, &RacsError)>,
        None::<fn(&usize, &())>,
    )
    .await;

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

pub async fn list_buckets(State(state): State<Arc<AppState>>) -> Response {
    let request_id = RequestId::generate();
    let repos = state.active_repositories_by_priority();
    let total = repos.len();
    let params: Vec<usize> = (0..total).collect();
    let repos_arc = Arc::new(repos);

    let outcome = racs_fanout::run(
        params,
        FanoutPolicy {
            quorum: 1,
            n_concurrent: 1,
            abort_on_exception: false,
        },
        {
            let repos = repos_arc.clone();
            let state = state.clone();
            move |idx: usize| {
                let repos = repos.clone();
                let state = state.clone();
                async move { state.call_serialized(&repos[idx], repos[idx].list_buckets()).await }
            }
        },
        None::<fn(&usize, &Vec<String>)>,
        None::<fn(&usize, &RacsError)>,
        None::<fn(&usize, &Vec<String>)>,
    )
    .await;

    if !outcome.quorum_reached {
        let err = outcome
            .exceptions
            .into_values()
            .next()
            .unwrap_or_else(|| RacsError::QuorumUnreachable {
                successes: outcome.results.len(),
                quorum: 1,
                total,
            });
        return error_response(&err, &request_id);
    }

    let mut names: Vec<String> = outcome.results.into_values().next().unwrap_or_default();
    names.sort();

    let result = ListBucketsResult {
        owner: Owner {
            id: "racs".to_string(),
            display_name: "racs".to_string(),
        },
        buckets: Buckets {
            bucket: names
                .into_iter()
                .map(|name| Bucket {
                    name,
                    creation_date: PLACEHOLDER_CREATION_DATE.to_string(),
                })
                .collect(),
        },
    };
    xml_response(StatusCode::OK, &result, &request_id)
}

#[derive(Debug, Deserialize)]
pub struct ListBucketQuery {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
}

pub async fn list_bucket_contents(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(query): Query<ListBucketQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request_id = RequestId::generate();
    if let Some(err) = check_unimplemented_features(&headers, uri.query()) {
        return error_response(&err, &request_id);
    }
    let bucket_name = BucketName::from(bucket);

    let active = state.active_repositories_by_priority();
    let total = active.len();
    let params: Vec<usize> = (0..total).collect();
    let repos_arc = Arc::new(active);
    let bucket_arc = Arc::new(bucket_name.clone());
    let prefix = query.prefix.clone();
    let marker = query.marker.clone();
    let delimiter = query.delimiter.clone();
    let max_keys = query.max_keys;

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
            let state = state.clone();
            move |idx: usize| {
                let repos = repos.clone();
                let bucket = bucket.clone();
                let prefix = prefix.clone();
                let marker = marker.clone();
                let delimiter = delimiter.clone();
                let state = state.clone();
                async move {
                    state
                        .call_serialized(
                            &repos[idx],
                            repos[idx].list_bucket(&bucket, prefix.as_deref(), marker.as_deref(), delimiter.as_deref(), max_keys),
                        )
                        .await
                        .map(|listing| (listing.entries, listing.common_prefixes))
                }
            }
        },
        None::<fn(&usize, &(Vec<ObjectMetaData>, Vec<String>))>,
        None::<fn(&usize, &RacsError)>,
        None::<fn(&usize, &(Vec<ObjectMetaData>, Vec<String>))>,
    )
    .await;

    if !outcome.quorum_reached {
        let err = outcome
            .exceptions
            .into_values()
            .next()
            .unwrap_or_else(|| RacsError::QuorumUnreachable {
                successes: outcome.results.len(),
                quorum: 1,
                total,
            });
        return error_response(&err, &request_id);
    }

    let (entries, common_prefixes) = outcome.results.into_values().next().unwrap_or_default();
    let repos_for_heads = repos_arc.clone();
    let bucket_for_heads = bucket_arc.clone();
    let state_for_heads = state.clone();
    let contents = stream::iter(entries.into_iter().map(|entry| {
        let bucket = bucket_for_heads.clone();
        let repos = repos_for_heads.clone();
        let state = state_for_heads.clone();
        async move { enrich_entry(&state, &bucket, entry, (*repos).clone()).await }
    }))
    .buffer_unordered(HEAD_ENRICHMENT_CONCURRENCY)
    .collect::<Vec<_>>()
    .await;

    let result = ListBucketResult {
        name: bucket_name.as_str().to_string(),
        prefix: query.prefix.unwrap_or_default(),
        marker: query.marker.unwrap_or_default(),
        delimiter: query.delimiter,
        max_keys: u32::try_from(query.max_keys.unwrap_or(1000)).unwrap_or(u32::MAX),
        is_truncated: false,
        common_prefixes: common_prefixes.into_iter().map(|prefix| CommonPrefix { prefix }).collect(),
        contents,
    };
    xml_response(StatusCode::OK, &result, &request_id)
}

/// Resolves `entry`'s true size/ETag from its FECMeta: read straight
/// off the listing's own per-entry metadata when present, otherwise
/// fall back to a HEAD through the [`racs_cache::HeadCache`] (§4.6,
/// §9 Open Question 3). A repository whose listing never carries
/// FECMeta (the S3 adapter's minimal key-only parse, for instance)
/// always takes the HEAD path; one that mirrors it into every entry
/// (the filesystem adapter) never does.
async fn enrich_entry(
    state: &Arc<AppState>,
    bucket: &BucketName,
    entry: ObjectMetaData,
    repos: Vec<Arc<dyn Repository>>,
) -> ObjectContent {
    let from_entry = entry.metadata.get(FECMETA_HEADER).and_then(|s| FecMeta::decode(s).ok());

    let fecmeta = match from_entry {
        Some(fm) => Some(fm),
        None => resolve_via_head_cache(state, bucket, &entry.key, repos).await,
    };

    let (size, etag) = match &fecmeta {
        Some(fm) => (fm.size, fm.etag()),
        None => {
            tracing::warn!(bucket = %bucket, key = %entry.key, "listing entry has no recoverable FECMeta, using raw share stat");
            (entry.size, format!("\"{}\"", entry.etag))
        }
    };

    ObjectContent {
        key: entry.key.as_str().to_string(),
        last_modified: racs_common::timefmt::iso8601_millis(entry.last_modified_unix),
        etag,
        size,
        storage_class: "STANDARD".to_string(),
    }
}

async fn resolve_via_head_cache(
    state: &Arc<AppState>,
    bucket: &BucketName,
    key: &ObjectKey,
    repos: Vec<Arc<dyn Repository>>,
) -> Option<FecMeta> {
    if let Some(cached) = state.head_cache.get(bucket, key) {
        if let Some(fm) = cached.get(FECMETA_HEADER).and_then(|s| FecMeta::decode(s).ok()) {
            return Some(fm);
        }
    }

    let headers = fanout_head(state, bucket, key, repos).await.ok().flatten()?;
    state.head_cache.put(bucket, key, headers.clone());
    headers.get(FECMETA_HEADER).and_then(|s| FecMeta::decode(s).ok())
}
