//! Shared application state assembled at startup (§4, §6).

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use racs_cache::HeadCache;
use racs_common::{Config, ReadPolicy, Result};
use racs_coordination::{CoordinationClient, InProcessStore};
use racs_erasure::ErasureCodec;
use racs_repository::{build_repository, Repository};
use tokio::sync::Mutex;

const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_ROOT: &str = "/racs/locks";

pub struct AppState {
    pub repositories: Vec<Arc<dyn Repository>>,
    pub codec: ErasureCodec,
    pub k: u8,
    pub read_policy: ReadPolicy,
    pub verify_listings_consistent: bool,
    pub coordination: CoordinationClient,
    pub head_cache: HeadCache,
    metrics_handle: PrometheusHandle,
    stats_reset_at: AtomicI64,
    /// One mutex per repository name, lazily created, for adapters
    /// that declare `requires_serialization()` (§5 shared-resource
    /// policy: "the executor honors this by routing that adapter's
    /// work through a per-adapter lock").
    adapter_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AppState {
    pub fn build(config: &Config, metrics_handle: PrometheusHandle) -> Result<Self> {
        let repositories: Vec<Arc<dyn Repository>> = config
            .repositories
            .iter()
            .map(build_repository)
            .collect::<Result<_>>()?;

        let m = config.m();
        let codec = ErasureCodec::new(config.racs.k, m)
            .map_err(|e| racs_common::RacsError::Configuration(e.to_string()))?;

        let coordination = if config.racs.use_zookeeper {
            CoordinationClient::new(Some(Arc::new(InProcessStore::new())), LOCK_ROOT, LOCK_ACQUIRE_TIMEOUT)
        } else {
            CoordinationClient::disabled()
        };

        Ok(Self {
            repositories,
            codec,
            k: config.racs.k,
            read_policy: config.racs.minimize_latency_or_bandwidth,
            verify_listings_consistent: config.racs.verify_listings_consistent,
            coordination,
            head_cache: HeadCache::with_default_ttl(),
            metrics_handle,
            stats_reset_at: AtomicI64::new(0),
            adapter_locks: DashMap::new(),
        })
    }

    /// Returns the shared per-adapter lock for `repo`, creating it on
    /// first use. Adapters are looked up by stable name, since the
    /// same backend's `Arc<dyn Repository>` is cloned into every
    /// in-flight request independently.
    fn adapter_lock(&self, repo_name: &str) -> Arc<Mutex<()>> {
        self.adapter_locks
            .entry(repo_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `fut` directly, or serialized behind `repo`'s per-adapter
    /// lock when `repo.requires_serialization()` is true (§5). Every
    /// caller that dispatches a repository operation inside a fan-out
    /// worker routes it through this so a non-reentrant adapter client
    /// (the Cloud Files adapter, matching the source's rationale for
    /// its own S3 client) never runs two calls concurrently.
    pub async fn call_serialized<T, Fut>(&self, repo: &Arc<dyn Repository>, fut: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        if repo.requires_serialization() {
            let lock = self.adapter_lock(repo.name());
            let _guard = lock.lock().await;
            fut.await
        } else {
            fut.await
        }
    }

    /// Looks up a configured repository by its stable name, for the
    /// admin surface's per-repository commands (§4.6).
    #[must_use]
    pub fn find_repository(&self, name: &str) -> Option<Arc<dyn Repository>> {
        self.repositories.iter().find(|r| r.name() == name).cloned()
    }

    /// The current Prometheus registry snapshot, shared verbatim by
    /// `/metrics` and the admin stats dump (§6: "reads the same
    /// registry snapshot rather than keeping a parallel ad hoc counter
    /// table").
    #[must_use]
    pub fn metrics_snapshot(&self) -> String {
        self.metrics_handle.render()
    }

    /// The allow-listed `reset_stats` admin command (§4.6, §9). The
    /// `metrics` facade's counters are monotonic by design, so this
    /// cannot zero the underlying registry without a parallel counter
    /// table this design deliberately avoids; it instead records the
    /// reset instant, which the admin page reports alongside the
    /// still-cumulative snapshot.
    pub fn reset_stats(&self) {
        self.stats_reset_at.store(unix_now(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats_reset_at_http_date(&self) -> String {
        racs_common::timefmt::http_date(self.stats_reset_at.load(Ordering::Relaxed))
    }

    /// Active repositories ordered by ascending priority, matching the
    /// deterministic `choose_repositories` policy (§4.6).
    pub fn active_repositories_by_priority(&self) -> Vec<Arc<dyn Repository>> {
        let mut active: Vec<Arc<dyn Repository>> = self
            .repositories
            .iter()
            .filter(|r| r.active())
            .cloned()
            .collect();
        active.sort_by_key(|r| r.priority());
        active
    }

    /// The erasure share a repository always holds, fixed at its
    /// position in the configured repository list. PUT and GET both
    /// dispatch over whichever repositories happen to be active at the
    /// time, so that subset's membership and order can differ between
    /// the two calls (a repository disabled in between is the common
    /// case); binding the share to a repository's identity rather than
    /// to its transient position among active candidates keeps every
    /// repository's share stable regardless of what else is active.
    #[must_use]
    pub fn share_index(&self, repo: &Arc<dyn Repository>) -> usize {
        self.repositories
            .iter()
            .position(|r| r.name() == repo.name())
            .unwrap_or(0)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}
