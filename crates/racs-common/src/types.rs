//! Newtypes shared by every crate that speaks to a repository.

use std::collections::HashMap;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Opaque bucket name. RACS imposes no naming rules beyond non-empty;
/// naming validity is the client's problem, not the proxy's (§3).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, From, Into, Serialize, Deserialize)]
pub struct BucketName(String);

impl BucketName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BucketName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque object key, scoped to a bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, From, Into, Serialize, Deserialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// User-supplied `x-amz-meta-*` entries, prefix already stripped.
pub type UserMetadata = HashMap<String, String>;

/// Read policy for choosing which k of N repositories to query on GET (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    /// Query all active repositories; first k responses win.
    Latency,
    /// Query only the first k by priority; caller retries on failure.
    Bandwidth,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::Bandwidth
    }
}

/// Erasure parameters: m shares total, any k reconstruct. 1 <= k <= m <= 256.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcParams {
    pub k: u8,
    pub m: u8,
}

impl EcParams {
    #[must_use]
    pub fn new(k: u8, m: u8) -> Self {
        Self { k, m }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.k >= 1 && self.k <= self.m
    }
}
