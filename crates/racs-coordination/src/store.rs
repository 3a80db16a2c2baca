//! The narrow primitive set the lock protocol needs from an external
//! coordination service (§4.4): create a node, create a sequential
//! ephemeral child, list children, watch one node for removal, delete.
//!
//! `InProcessStore` satisfies this trait entirely in memory, for
//! single-process deployments and tests. A networked backend (e.g. a
//! real ZooKeeper client) would implement the same trait and plug into
//! the lock protocol in `client.rs` unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use racs_common::{RacsError, Result};
use tokio::sync::Notify;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Creates `path` with `payload` if it doesn't already exist.
    /// Idempotent: succeeds silently when the node is already there.
    async fn ensure_node(&self, path: &str, payload: &str) -> Result<()>;

    /// Creates a sequential ephemeral child of `parent` named
    /// `<prefix>-<seq>`, where `<seq>` increases monotonically under
    /// that parent. Returns the full child path.
    async fn create_sequential_ephemeral(&self, parent: &str, prefix: &str, payload: &str) -> Result<String>;

    /// Lists the full paths of `parent`'s direct children.
    async fn list_children(&self, parent: &str) -> Result<Vec<String>>;

    /// Resolves once `path` has been deleted (or was already absent).
    async fn watch_removal(&self, path: &str) -> Result<()>;

    /// Deletes `path` if present; no error if already absent.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Best-effort delete of `path` only if it currently has no
    /// children; silently does nothing otherwise.
    async fn delete_if_empty(&self, path: &str) -> Result<()>;
}

struct Node {
    payload: String,
    children: HashMap<String, Arc<Notify>>,
    next_seq: u64,
}

/// In-memory reference implementation of [`CoordinationStore`].
#[derive(Default)]
pub struct InProcessStore {
    nodes: Mutex<HashMap<String, Node>>,
}

impl InProcessStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InProcessStore {
    async fn ensure_node(&self, path: &str, payload: &str) -> Result<()> {
        let mut nodes = self.nodes.lock();
        nodes.entry(path.to_string()).or_insert_with(|| Node {
            payload: payload.to_string(),
            children: HashMap::new(),
            next_seq: 0,
        });
        Ok(())
    }

    async fn create_sequential_ephemeral(&self, parent: &str, prefix: &str, payload: &str) -> Result<String> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .get_mut(parent)
            .ok_or_else(|| RacsError::Adapter(format!("coordination node missing: {parent}")))?;
        let seq = node.next_seq;
        node.next_seq += 1;
        let name = format!("{prefix}-{seq:010}");
        let child_path = format!("{parent}/{name}");
        node.children.insert(name, Arc::new(Notify::new()));
        nodes.insert(
            child_path.clone(),
            Node {
                payload: payload.to_string(),
                children: HashMap::new(),
                next_seq: 0,
            },
        );
        Ok(child_path)
    }

    async fn list_children(&self, parent: &str) -> Result<Vec<String>> {
        let nodes = self.nodes.lock();
        let Some(node) = nodes.get(parent) else {
            return Ok(Vec::new());
        };
        let mut children: Vec<String> = node.children.keys().map(|name| format!("{parent}/{name}")).collect();
        children.sort_by_key(|p| sequence_suffix(p));
        Ok(children)
    }

    async fn watch_removal(&self, path: &str) -> Result<()> {
        let notify = {
            let nodes = self.nodes.lock();
            if !nodes.contains_key(path) {
                return Ok(());
            }
            let Some((parent, name)) = split_parent_child(path) else {
                return Ok(());
            };
            nodes.get(parent).and_then(|p| p.children.get(name)).cloned()
        };
        match notify {
            Some(notify) => {
                notify.notified().await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut nodes = self.nodes.lock();
        nodes.remove(path);
        if let Some((parent, name)) = split_parent_child(path) {
            if let Some(p) = nodes.get_mut(parent) {
                if let Some(notify) = p.children.remove(name) {
                    notify.notify_waiters();
                }
            }
        }
        Ok(())
    }

    async fn delete_if_empty(&self, path: &str) -> Result<()> {
        let mut nodes = self.nodes.lock();
        let empty = nodes.get(path).is_some_and(|n| n.children.is_empty());
        if empty {
            nodes.remove(path);
        }
        Ok(())
    }
}

fn split_parent_child(path: &str) -> Option<(&str, &str)> {
    let idx = path.rfind('/')?;
    Some((&path[..idx], &path[idx + 1..]))
}

fn sequence_suffix(path: &str) -> u64 {
    path.rsplit('-').next().and_then(|s| s.parse().ok()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_children_are_ordered_by_sequence() {
        let store = InProcessStore::new();
        store.ensure_node("/locks/b:k", "root").await.unwrap();
        let a = store.create_sequential_ephemeral("/locks/b:k", "write", "p1").await.unwrap();
        let b = store.create_sequential_ephemeral("/locks/b:k", "read", "p2").await.unwrap();
        let children = store.list_children("/locks/b:k").await.unwrap();
        assert_eq!(children, vec![a, b]);
    }

    #[tokio::test]
    async fn delete_if_empty_only_removes_childless_nodes() {
        let store = InProcessStore::new();
        store.ensure_node("/locks/b:k", "root").await.unwrap();
        let child = store.create_sequential_ephemeral("/locks/b:k", "write", "p").await.unwrap();
        store.delete_if_empty("/locks/b:k").await.unwrap();
        assert_eq!(store.list_children("/locks/b:k").await.unwrap(), vec![child.clone()]);

        store.delete(&child).await.unwrap();
        store.delete_if_empty("/locks/b:k").await.unwrap();
        assert!(store.list_children("/locks/b:k").await.unwrap().is_empty());
    }
}
