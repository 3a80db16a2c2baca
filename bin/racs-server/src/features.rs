//! Detects recognized-but-unimplemented S3 surface requests (§1, §6).
//!
//! RACS parses these headers/query parameters (it knows they exist in
//! the S3 dialect) but does not implement the features they request:
//! ACL enforcement, server-side copy, multipart upload, bucket
//! location, request-payer. A match here is a 500, not a 400 — the
//! request was well-formed, the feature just isn't there.

use axum::http::HeaderMap;
use racs_common::RacsError;

const UNIMPLEMENTED_QUERY_PARAMS: &[&str] = &["acl", "location", "requestPayment", "uploadId", "uploads"];

#[must_use]
pub fn check_unimplemented_features(headers: &HeaderMap, query: Option<&str>) -> Option<RacsError> {
    if headers.contains_key("x-amz-acl") {
        return Some(RacsError::FeatureUnimplemented("x-amz-acl".to_string()));
    }
    if headers.keys().any(|k| k.as_str().starts_with("x-amz-copy-source")) {
        return Some(RacsError::FeatureUnimplemented(
            "x-amz-copy-source (server-side copy)".to_string(),
        ));
    }
    let query = query?;
    for param in UNIMPLEMENTED_QUERY_PARAMS {
        if query_has_param(query, param) {
            return Some(RacsError::FeatureUnimplemented(format!("?{param}")));
        }
    }
    None
}

fn query_has_param(query: &str, name: &str) -> bool {
    query.split('&').any(|pair| {
        let key = pair.split('=').next().unwrap_or("");
        key.eq_ignore_ascii_case(name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_copy_source_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-copy-source", "bucket/key".parse().unwrap());
        assert!(check_unimplemented_features(&headers, None).is_some());
    }

    #[test]
    fn detects_acl_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-acl", "public-read".parse().unwrap());
        assert!(check_unimplemented_features(&headers, None).is_some());
    }

    #[test]
    fn detects_acl_and_multipart_query_params() {
        assert!(check_unimplemented_features(&HeaderMap::new(), Some("acl")).is_some());
        assert!(check_unimplemented_features(&HeaderMap::new(), Some("uploadId=abc&partNumber=1")).is_some());
    }

    #[test]
    fn plain_request_passes() {
        assert!(check_unimplemented_features(&HeaderMap::new(), Some("prefix=foo&max-keys=10")).is_none());
        assert!(check_unimplemented_features(&HeaderMap::new(), None).is_none());
    }
}
