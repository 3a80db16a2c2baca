//! Reader/writer lock per (bucket,key), implementing the five-step
//! sequential-ephemeral protocol described in §4.4.

use std::sync::Arc;
use std::time::Duration;

use racs_common::{BucketName, ObjectKey, Result};
use tokio::time::timeout;

use crate::store::CoordinationStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LockKind {
    Read,
    Write,
}

impl LockKind {
    fn prefix(self) -> &'static str {
        match self {
            LockKind::Read => "read",
            LockKind::Write => "write",
        }
    }
}

/// Holds a lock until dropped or [`LockGuard::release`] is called
/// explicitly. `None` means coordination was disabled or the
/// acquisition timed out and the caller is proceeding unprotected
/// (§4.4 failure model — matches the source, dangerous by design).
pub struct LockGuard {
    inner: Option<(Arc<dyn CoordinationStore>, String, String)>,
}

impl LockGuard {
    fn none() -> Self {
        Self { inner: None }
    }

    /// An already-released guard, for callers that need a value to
    /// fall back to when acquisition itself fails.
    #[must_use]
    pub fn noop() -> Self {
        Self::none()
    }

    /// Releases the lock now rather than waiting for drop. Safe to
    /// call more than once.
    pub async fn release(&mut self) {
        if let Some((store, child, locknode)) = self.inner.take() {
            let _ = store.delete(&child).await;
            let _ = store.delete_if_empty(&locknode).await;
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.is_some()
    }
}

/// Coordinates reader/writer locks scoped to `(bucket, key)`.
///
/// When `store` is `None`, every acquisition call returns an
/// already-released no-op guard immediately (§4.4: "If the
/// coordination service is disabled in config...").
pub struct CoordinationClient {
    store: Option<Arc<dyn CoordinationStore>>,
    root: String,
    acquire_timeout: Duration,
    counter: std::sync::atomic::AtomicU64,
}

impl CoordinationClient {
    #[must_use]
    pub fn new(store: Option<Arc<dyn CoordinationStore>>, root: impl Into<String>, acquire_timeout: Duration) -> Self {
        Self {
            store,
            root: root.into(),
            acquire_timeout,
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, "", Duration::from_secs(0))
    }

    pub async fn acquire_read_lock(&self, bucket: &BucketName, key: &ObjectKey) -> Result<LockGuard> {
        self.acquire(LockKind::Read, bucket, key).await
    }

    pub async fn acquire_write_lock(&self, bucket: &BucketName, key: &ObjectKey) -> Result<LockGuard> {
        self.acquire(LockKind::Write, bucket, key).await
    }

    async fn acquire(&self, kind: LockKind, bucket: &BucketName, key: &ObjectKey) -> Result<LockGuard> {
        let Some(store) = self.store.clone() else {
            return Ok(LockGuard::none());
        };

        let locknode = format!("{}/{}", self.root, lock_node_name(bucket, key));
        let payload = format!(
            "{}:{}",
            std::process::id(),
            self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        );

        match timeout(self.acquire_timeout, acquire_inner(store.as_ref(), kind, &locknode, &payload)).await {
            Ok(Ok(child)) => Ok(LockGuard {
                inner: Some((store, child, locknode)),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(%locknode, "lock acquisition timed out, proceeding without coordination");
                Ok(LockGuard::none())
            }
        }
    }
}

async fn acquire_inner(
    store: &dyn CoordinationStore,
    kind: LockKind,
    locknode: &str,
    payload: &str,
) -> Result<String> {
    store.ensure_node(locknode, "").await?;
    let child = store
        .create_sequential_ephemeral(locknode, kind.prefix(), payload)
        .await?;

    loop {
        let children = store.list_children(locknode).await?;
        let my_index = children
            .iter()
            .position(|c| c == &child)
            .expect("just-created child must be present");

        let blocker = match kind {
            LockKind::Write => {
                if my_index == 0 {
                    None
                } else {
                    Some(children[my_index - 1].clone())
                }
            }
            LockKind::Read => children[..my_index]
                .iter()
                .rev()
                .find(|c| is_write_node(c))
                .cloned(),
        };

        match blocker {
            None => return Ok(child),
            Some(predecessor) => {
                store.watch_removal(&predecessor).await?;
            }
        }
    }
}

fn is_write_node(path: &str) -> bool {
    path.rsplit('/').next().is_some_and(|name| name.starts_with("write"))
}

fn lock_node_name(bucket: &BucketName, key: &ObjectKey) -> String {
    format!("{}:{}", bucket.as_str(), key.as_str()).replace('/', "SLASH")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InProcessStore;

    #[tokio::test]
    async fn writer_then_writer_serializes() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InProcessStore::new());
        let client = CoordinationClient::new(Some(store), "/locks", Duration::from_secs(5));
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());

        let mut first = client.acquire_write_lock(&bucket, &key).await.unwrap();
        assert!(first.is_live());

        let client = Arc::new(client);
        let client2 = client.clone();
        let bucket2 = bucket.clone();
        let key2 = key.clone();
        let handle = tokio::spawn(async move { client2.acquire_write_lock(&bucket2, &key2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        first.release().await;
        let second = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("second lock should be granted after release")
            .unwrap()
            .unwrap();
        assert!(second.is_live());
    }

    #[tokio::test]
    async fn readers_do_not_block_each_other() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InProcessStore::new());
        let client = CoordinationClient::new(Some(store), "/locks", Duration::from_secs(5));
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());

        let r1 = client.acquire_read_lock(&bucket, &key).await.unwrap();
        let r2 = client.acquire_read_lock(&bucket, &key).await.unwrap();
        assert!(r1.is_live());
        assert!(r2.is_live());
    }

    #[tokio::test]
    async fn disabled_client_returns_noop_guard() {
        let client = CoordinationClient::disabled();
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());
        let guard = client.acquire_write_lock(&bucket, &key).await.unwrap();
        assert!(!guard.is_live());
    }

    #[tokio::test]
    async fn timeout_falls_back_to_unprotected_access() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InProcessStore::new());
        let client = CoordinationClient::new(Some(store), "/locks", Duration::from_millis(10));
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());

        let _held = client.acquire_write_lock(&bucket, &key).await.unwrap();
        let second = client.acquire_write_lock(&bucket, &key).await.unwrap();
        assert!(!second.is_live());
    }
}
