//! Distributed reader/writer locking per (bucket,key) (§4.4).

pub mod client;
pub mod store;

pub use client::{CoordinationClient, LockGuard};
pub use store::{CoordinationStore, InProcessStore};
