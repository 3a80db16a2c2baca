//! Bounded, lazily-evicted cache of HEAD responses (§4.5).
//!
//! Used to avoid re-fetching per-entry size/etag when enriching a
//! bucket listing. Process-local and inconsistent under concurrent
//! writers by design: a cached entry can go stale the instant another
//! client overwrites the object, and nothing here invalidates it early.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use racs_common::{BucketName, ObjectKey, UserMetadata};

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct CacheKey {
    bucket: BucketName,
    key: ObjectKey,
}

struct Entry {
    headers: UserMetadata,
    inserted_at: Instant,
}

/// A process-local cache of object HEAD metadata.
pub struct HeadCache {
    ttl: Duration,
    entries: DashMap<CacheKey, Entry>,
}

impl HeadCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    /// Returns the cached headers for `(bucket,key)`, evicting and
    /// returning `None` if the entry has outlived its TTL.
    #[must_use]
    pub fn get(&self, bucket: &BucketName, key: &ObjectKey) -> Option<UserMetadata> {
        let cache_key = CacheKey {
            bucket: bucket.clone(),
            key: key.clone(),
        };
        let expired = self
            .entries
            .get(&cache_key)
            .is_some_and(|e| e.inserted_at.elapsed() > self.ttl);
        if expired {
            self.entries.remove(&cache_key);
            return None;
        }
        self.entries.get(&cache_key).map(|e| e.headers.clone())
    }

    pub fn put(&self, bucket: &BucketName, key: &ObjectKey, headers: UserMetadata) {
        self.entries.insert(
            CacheKey {
                bucket: bucket.clone(),
                key: key.clone(),
            },
            Entry {
                headers,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, bucket: &BucketName, key: &ObjectKey) {
        self.entries.remove(&CacheKey {
            bucket: bucket.clone(),
            key: key.clone(),
        });
    }

    /// Sweeps every entry past its TTL. Callers may invoke this
    /// periodically; `get` also evicts lazily on access, so this is
    /// purely a memory-bound, not a correctness, concern.
    pub fn clean(&self) {
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= self.ttl);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = HeadCache::with_default_ttl();
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());
        let mut headers = UserMetadata::new();
        headers.insert("Etag".to_string(), "\"abc\"".to_string());
        cache.put(&bucket, &key, headers.clone());
        assert_eq!(cache.get(&bucket, &key), Some(headers));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = HeadCache::new(Duration::from_millis(1));
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());
        cache.put(&bucket, &key, UserMetadata::new());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(&bucket, &key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_removes_entry_immediately() {
        let cache = HeadCache::with_default_ttl();
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());
        cache.put(&bucket, &key, UserMetadata::new());
        cache.invalidate(&bucket, &key);
        assert!(cache.get(&bucket, &key).is_none());
    }

    #[test]
    fn clean_sweeps_expired_entries() {
        let cache = HeadCache::new(Duration::from_millis(1));
        let bucket = BucketName::from("b".to_string());
        for i in 0..5 {
            cache.put(&bucket, &ObjectKey::from(format!("k{i}")), UserMetadata::new());
        }
        std::thread::sleep(Duration::from_millis(10));
        cache.clean();
        assert!(cache.is_empty());
    }
}
