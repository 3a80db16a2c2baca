//! The abstract Repository interface every backend adapter satisfies
//! (§4.1).

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use racs_common::{BucketName, ObjectKey, Result, UserMetadata};

/// One entry returned by `list_bucket`.
#[derive(Clone, Debug)]
pub struct ObjectMetaData {
    pub key: ObjectKey,
    pub last_modified_unix: i64,
    pub etag: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub metadata: UserMetadata,
}

/// Result of `list_bucket`: matched entries plus, when a delimiter was
/// supplied, the distinct rolled-up prefixes (§4.6 LIST BUCKET CONTENTS).
pub struct BucketListing {
    pub entries: Vec<ObjectMetaData>,
    pub common_prefixes: Vec<String>,
}

/// Uniform backend abstraction (§4.1). Adapters: Filesystem, S3, Cloud
/// Files. `priority`/`active` are plain atomics so the admin surface
/// can mutate them through a shared `Arc<dyn Repository>` without the
/// core ever taking a lock for it.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Stable, configured name (used for admin lookups and logging).
    fn name(&self) -> &str;

    fn priority(&self) -> i32;
    fn set_priority(&self, priority: i32);

    fn active(&self) -> bool;
    fn set_active(&self, active: bool);

    /// Adapters whose underlying client is not safe for concurrent use
    /// return `true`; the fan-out executor then routes all calls to
    /// this adapter through a per-adapter lock (§5).
    fn requires_serialization(&self) -> bool {
        false
    }

    async fn create_bucket(&self, bucket: &BucketName) -> Result<()>;
    async fn delete_bucket(&self, bucket: &BucketName) -> Result<()>;

    async fn put_object(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        data: Bytes,
        content_type: Option<String>,
        metadata: UserMetadata,
    ) -> Result<()>;

    async fn get_object(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> Result<(Bytes, Option<String>, UserMetadata)>;

    async fn head(&self, bucket: &BucketName, key: &ObjectKey) -> Result<UserMetadata>;

    async fn delete_object(&self, bucket: &BucketName, key: &ObjectKey) -> Result<()>;

    async fn list_bucket(
        &self,
        bucket: &BucketName,
        prefix: Option<&str>,
        marker: Option<&str>,
        delimiter: Option<&str>,
        max_keys: Option<usize>,
    ) -> Result<BucketListing>;

    async fn list_buckets(&self) -> Result<Vec<String>>;
}

/// Shared priority/active state, embedded by every adapter so they
/// don't each reimplement the same atomics.
#[derive(Debug)]
pub struct RepoAttrs {
    priority: AtomicI32,
    active: AtomicBool,
}

impl RepoAttrs {
    #[must_use]
    pub fn new(priority: i32, active: bool) -> Self {
        Self {
            priority: AtomicI32::new(priority),
            active: AtomicBool::new(active),
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, p: i32) {
        self.priority.store(p, Ordering::Relaxed);
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, a: bool) {
        self.active.store(a, Ordering::Relaxed);
    }
}
