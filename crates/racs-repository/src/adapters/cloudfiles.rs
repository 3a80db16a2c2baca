//! Repository adapter for a Rackspace Cloud Files-style store (§4.1).
//!
//! Cloud Files authenticates out of band: a token is fetched once (or
//! refreshed on expiry) against an auth endpoint, then attached to
//! every storage request. Containers stand in for buckets.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use racs_common::{BucketName, ObjectKey, RacsError, Result, UserMetadata};

use crate::listing::select_keys;
use crate::quoting::{CLOUDFILES_SPECIAL, quote};
use crate::repository::{BucketListing, ObjectMetaData, RepoAttrs, Repository};

struct AuthState {
    token: String,
    storage_url: String,
}

pub struct CloudFilesRepository {
    name: String,
    auth_endpoint: String,
    username: String,
    api_key: String,
    container_prefix: String,
    client: reqwest::Client,
    auth: Arc<RwLock<Option<AuthState>>>,
    attrs: RepoAttrs,
}

impl CloudFilesRepository {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        auth_endpoint: impl Into<String>,
        username: impl Into<String>,
        api_key: impl Into<String>,
        container_prefix: impl Into<String>,
        priority: i32,
        active: bool,
    ) -> Self {
        Self {
            name: name.into(),
            auth_endpoint: auth_endpoint.into(),
            username: username.into(),
            api_key: api_key.into(),
            container_prefix: container_prefix.into(),
            client: reqwest::Client::new(),
            auth: Arc::new(RwLock::new(None)),
            attrs: RepoAttrs::new(priority, active),
        }
    }

    /// Cloud Files's Python client is not safe to share across
    /// concurrent requests without its own locking; route every call
    /// for this adapter through the fan-out executor's per-adapter lock.
    fn container(&self, bucket: &BucketName) -> String {
        format!("{}{}", self.container_prefix, quote(bucket.as_str(), CLOUDFILES_SPECIAL))
    }

    async fn authenticate(&self) -> Result<AuthState> {
        let resp = self
            .client
            .get(&self.auth_endpoint)
            .header("X-Auth-User", &self.username)
            .header("X-Auth-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| RacsError::BackendTransient(format!("auth request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(RacsError::BackendTransient(format!("authentication failed: {}", resp.status())));
        }
        let token = resp
            .headers()
            .get("x-auth-token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RacsError::BackendTransient("auth response missing X-Auth-Token".to_string()))?
            .to_string();
        let storage_url = resp
            .headers()
            .get("x-storage-url")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RacsError::BackendTransient("auth response missing X-Storage-Url".to_string()))?
            .to_string();
        Ok(AuthState { token, storage_url })
    }

    async fn current_auth(&self) -> Result<(String, String)> {
        if let Some(state) = self.auth.read().as_ref() {
            return Ok((state.token.clone(), state.storage_url.clone()));
        }
        let fresh = self.authenticate().await?;
        let result = (fresh.token.clone(), fresh.storage_url.clone());
        *self.auth.write() = Some(fresh);
        Ok(result)
    }

    async fn invalidate_and_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String, String) -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>>>,
    {
        let (token, storage_url) = self.current_auth().await?;
        if let Some(v) = op(token, storage_url).await? {
            return Ok(v);
        }
        tracing::warn!(repo = %self.name, "cloud files token rejected, re-authenticating");
        *self.auth.write() = None;
        let (token, storage_url) = self.current_auth().await?;
        op(token, storage_url)
            .await?
            .ok_or_else(|| RacsError::BackendTransient("authentication token rejected twice".to_string()))
    }
}

#[async_trait]
impl Repository for CloudFilesRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.attrs.priority()
    }

    fn set_priority(&self, priority: i32) {
        self.attrs.set_priority(priority);
    }

    fn active(&self) -> bool {
        self.attrs.active()
    }

    fn set_active(&self, active: bool) {
        self.attrs.set_active(active);
    }

    fn requires_serialization(&self) -> bool {
        true
    }

    async fn create_bucket(&self, bucket: &BucketName) -> Result<()> {
        let container = self.container(bucket);
        self.invalidate_and_retry(|token, storage_url| {
            let client = self.client.clone();
            let container = container.clone();
            async move {
                let resp = client
                    .put(format!("{storage_url}/{container}"))
                    .header("X-Auth-Token", token)
                    .send()
                    .await
                    .map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                match resp.status().as_u16() {
                    401 => Ok(None),
                    s if (200..300).contains(&s) => Ok(Some(())),
                    s => Err(RacsError::BackendTransient(format!("create_bucket: {s}"))),
                }
            }
        })
        .await
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> Result<()> {
        let container = self.container(bucket);
        self.invalidate_and_retry(|token, storage_url| {
            let client = self.client.clone();
            let container = container.clone();
            let bucket_name = bucket.as_str().to_string();
            async move {
                let resp = client
                    .delete(format!("{storage_url}/{container}"))
                    .header("X-Auth-Token", token)
                    .send()
                    .await
                    .map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                match resp.status().as_u16() {
                    401 => Ok(None),
                    s if (200..300).contains(&s) => Ok(Some(())),
                    404 => Err(RacsError::NoSuchBucket(bucket_name.clone())),
                    409 => Err(RacsError::BucketNotEmpty(bucket_name.clone())),
                    s => Err(RacsError::BackendTransient(format!("delete_bucket: {s}"))),
                }
            }
        })
        .await
    }

    async fn put_object(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        data: Bytes,
        content_type: Option<String>,
        metadata: UserMetadata,
    ) -> Result<()> {
        let container = self.container(bucket);
        let object = quote(key.as_str(), CLOUDFILES_SPECIAL);
        self.invalidate_and_retry(|token, storage_url| {
            let client = self.client.clone();
            let container = container.clone();
            let object = object.clone();
            let data = data.clone();
            let content_type = content_type.clone();
            let metadata = metadata.clone();
            async move {
                let mut req = client
                    .put(format!("{storage_url}/{container}/{object}"))
                    .header("X-Auth-Token", &token)
                    .body(data);
                if let Some(ct) = &content_type {
                    req = req.header("Content-Type", ct);
                }
                for (k, v) in &metadata {
                    req = req.header(format!("X-Object-Meta-{k}"), v);
                }
                let resp = req.send().await.map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                match resp.status().as_u16() {
                    401 => Ok(None),
                    s if (200..300).contains(&s) => Ok(Some(())),
                    s => Err(RacsError::BackendTransient(format!("put_object: {s}"))),
                }
            }
        })
        .await
    }

    async fn get_object(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> Result<(Bytes, Option<String>, UserMetadata)> {
        let container = self.container(bucket);
        let object = quote(key.as_str(), CLOUDFILES_SPECIAL);
        let bucket_name = bucket.as_str().to_string();
        let key_name = key.as_str().to_string();
        self.invalidate_and_retry(|token, storage_url| {
            let client = self.client.clone();
            let container = container.clone();
            let object = object.clone();
            let bucket_name = bucket_name.clone();
            let key_name = key_name.clone();
            async move {
                let resp = client
                    .get(format!("{storage_url}/{container}/{object}"))
                    .header("X-Auth-Token", token)
                    .send()
                    .await
                    .map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                match resp.status().as_u16() {
                    401 => Ok(None),
                    404 => Err(RacsError::NotFound {
                        bucket: bucket_name.clone(),
                        key: key_name.clone(),
                    }),
                    s if (200..300).contains(&s) => {
                        let content_type = resp
                            .headers()
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let metadata = extract_object_metadata(resp.headers());
                        let body = resp.bytes().await.map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                        Ok(Some((body, content_type, metadata)))
                    }
                    s => Err(RacsError::BackendTransient(format!("get_object: {s}"))),
                }
            }
        })
        .await
    }

    async fn head(&self, bucket: &BucketName, key: &ObjectKey) -> Result<UserMetadata> {
        let container = self.container(bucket);
        let object = quote(key.as_str(), CLOUDFILES_SPECIAL);
        let bucket_name = bucket.as_str().to_string();
        let key_name = key.as_str().to_string();
        self.invalidate_and_retry(|token, storage_url| {
            let client = self.client.clone();
            let container = container.clone();
            let object = object.clone();
            let bucket_name = bucket_name.clone();
            let key_name = key_name.clone();
            async move {
                let resp = client
                    .head(format!("{storage_url}/{container}/{object}"))
                    .header("X-Auth-Token", token)
                    .send()
                    .await
                    .map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                match resp.status().as_u16() {
                    401 => Ok(None),
                    404 => Err(RacsError::NotFound {
                        bucket: bucket_name.clone(),
                        key: key_name.clone(),
                    }),
                    s if (200..300).contains(&s) => {
                        let mut headers = extract_object_metadata(resp.headers());
                        for (name, val) in [("content-type", "Content-Type"), ("content-length", "Content-Length"), ("etag", "Etag"), ("last-modified", "Last-Modified")] {
                            if let Some(v) = resp.headers().get(name).and_then(|v| v.to_str().ok()) {
                                headers.insert(val.to_string(), v.to_string());
                            }
                        }
                        Ok(Some(headers))
                    }
                    s => Err(RacsError::BackendTransient(format!("head: {s}"))),
                }
            }
        })
        .await
    }

    async fn delete_object(&self, bucket: &BucketName, key: &ObjectKey) -> Result<()> {
        let container = self.container(bucket);
        let object = quote(key.as_str(), CLOUDFILES_SPECIAL);
        self.invalidate_and_retry(|token, storage_url| {
            let client = self.client.clone();
            let container = container.clone();
            let object = object.clone();
            async move {
                let resp = client
                    .delete(format!("{storage_url}/{container}/{object}"))
                    .header("X-Auth-Token", token)
                    .send()
                    .await
                    .map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                match resp.status().as_u16() {
                    401 => Ok(None),
                    s if (200..300).contains(&s) || s == 404 => Ok(Some(())),
                    s => Err(RacsError::BackendTransient(format!("delete_object: {s}"))),
                }
            }
        })
        .await
    }

    async fn list_bucket(
        &self,
        bucket: &BucketName,
        prefix: Option<&str>,
        marker: Option<&str>,
        delimiter: Option<&str>,
        max_keys: Option<usize>,
    ) -> Result<BucketListing> {
        let container = self.container(bucket);
        let bucket_name = bucket.as_str().to_string();
        let raw_keys: Vec<String> = self
            .invalidate_and_retry(|token, storage_url| {
                let client = self.client.clone();
                let container = container.clone();
                let bucket_name = bucket_name.clone();
                async move {
                    let resp = client
                        .get(format!("{storage_url}/{container}"))
                        .header("X-Auth-Token", token)
                        .send()
                        .await
                        .map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                    match resp.status().as_u16() {
                        401 => Ok(None),
                        404 => Err(RacsError::NoSuchBucket(bucket_name.clone())),
                        s if (200..300).contains(&s) => {
                            let body = resp.text().await.map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                            Ok(Some(body.lines().map(str::to_string).collect()))
                        }
                        s => Err(RacsError::BackendTransient(format!("list_bucket: {s}"))),
                    }
                }
            })
            .await?;

        let (matched, common_prefixes) = select_keys(raw_keys, prefix, marker, delimiter, max_keys);
        let mut entries = Vec::with_capacity(matched.len());
        for k in matched {
            let key = ObjectKey::from(k);
            let headers = self.head(bucket, &key).await?;
            let size = headers.get("Content-Length").and_then(|v| v.parse().ok()).unwrap_or(0);
            let etag = headers.get("Etag").cloned().unwrap_or_default();
            let content_type = headers.get("Content-Type").cloned();
            entries.push(ObjectMetaData {
                key,
                last_modified_unix: 0,
                etag,
                size,
                content_type,
                metadata: UserMetadata::new(),
            });
        }
        Ok(BucketListing {
            entries,
            common_prefixes,
        })
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let raw: Vec<String> = self
            .invalidate_and_retry(|token, storage_url| {
                let client = self.client.clone();
                async move {
                    let resp = client
                        .get(storage_url)
                        .header("X-Auth-Token", token)
                        .send()
                        .await
                        .map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                    match resp.status().as_u16() {
                        401 => Ok(None),
                        s if (200..300).contains(&s) => {
                            let body = resp.text().await.map_err(|e| RacsError::BackendTransient(e.to_string()))?;
                            Ok(Some(body.lines().map(str::to_string).collect()))
                        }
                        s => Err(RacsError::BackendTransient(format!("list_buckets: {s}"))),
                    }
                }
            })
            .await?;
        Ok(raw)
    }
}

fn extract_object_metadata(headers: &reqwest::header::HeaderMap) -> UserMetadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            name.strip_prefix("x-object-meta-")
                .and_then(|suffix| value.to_str().ok().map(|v| (suffix.to_string(), v.to_string())))
        })
        .collect()
}
