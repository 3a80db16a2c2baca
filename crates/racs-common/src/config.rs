//! Declarative configuration (§6).
//!
//! Loaded from a TOML file, then overridden by `RACS_*` environment
//! variables, then by CLI flags (ascending precedence), mirroring the
//! layered-config convention the rest of this workspace uses.

use serde::{Deserialize, Serialize};

use crate::types::ReadPolicy;

/// Root configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub racs: RacsConfig,
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub zookeeper: Option<ZookeeperConfig>,
}

/// The `[racs]` section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RacsConfig {
    /// Minimum shares required to reconstruct an object.
    pub k: u8,
    pub host: String,
    pub port: u16,

    /// Total shares — one per configured repository, active or not.
    /// Defaults to the total number of configured repositories at
    /// startup if omitted.
    #[serde(default)]
    pub m: Option<u8>,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub minimize_latency_or_bandwidth: ReadPolicy,
    #[serde(default)]
    pub verify_listings_consistent: bool,
    #[serde(default)]
    pub logfile: Option<String>,
    #[serde(default)]
    pub unit_test_repositories: bool,
    #[serde(default)]
    pub use_zookeeper: bool,
    #[serde(default = "default_record_stats")]
    pub record_stats: bool,
}

const fn default_record_stats() -> bool {
    true
}

/// One `[[repository]]` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub class: RepositoryClass,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub priority: i32,

    // Filesystem adapter
    #[serde(default)]
    pub base_directory: Option<String>,

    // S3 / Cloud Files adapters
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub bucket_prefix: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub container_prefix: Option<String>,
}

const fn default_active() -> bool {
    true
}

/// `class =` values resolved through the adapter factory table (§9:
/// replaces the source's `eval()`-based dynamic class registration).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryClass {
    Fs,
    S3,
    Cloudfiles,
}

/// The `[zookeeper]` section, consulted only when `use_zookeeper = true`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZookeeperConfig {
    pub host: String,
    pub port: u16,
    pub root_node: String,
}

impl Config {
    /// Validate cross-field invariants not expressible in serde alone.
    /// Returns a human-readable reason on failure; the caller maps that
    /// to a nonzero process exit code (§6).
    pub fn validate(&self) -> Result<(), String> {
        let total = self.repositories.len();
        let m = self.m();

        if self.repositories.is_empty() {
            return Err("at least one [[repository]] is required".to_string());
        }
        if self.racs.k == 0 {
            return Err("racs.k must be >= 1".to_string());
        }
        // Every configured repository — active or not — is bound to a
        // fixed share index (`AppState::share_index`), so the codec must
        // produce exactly one share per configured repository. A `racs.m`
        // that undershoots or overshoots the repository count would leave
        // some repository's share index out of range.
        if usize::from(m) != total {
            return Err(format!(
                "racs.m ({m}) must equal the number of configured repositories ({total})"
            ));
        }
        if self.racs.k > m {
            return Err(format!("racs.k ({}) must be <= racs.m ({m})", self.racs.k));
        }
        Ok(())
    }

    /// Total shares: one per configured repository, active or not. This
    /// must stay in lockstep with the repository list's length so every
    /// repository's `share_index` (its fixed position in that list) is
    /// always a valid share slot, regardless of which repositories are
    /// active at a given moment.
    #[must_use]
    pub fn m(&self) -> u8 {
        self.racs.m.unwrap_or_else(|| u8::try_from(self.repositories.len()).unwrap_or(u8::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str, active: bool) -> RepositoryConfig {
        RepositoryConfig {
            name: name.to_string(),
            class: RepositoryClass::Fs,
            active,
            priority: 0,
            base_directory: Some("/tmp".to_string()),
            endpoint: None,
            access_key: None,
            secret_key: None,
            bucket_prefix: None,
            username: None,
            api_key: None,
            container_prefix: None,
        }
    }

    fn config(k: u8, m: Option<u8>, repositories: Vec<RepositoryConfig>) -> Config {
        Config {
            racs: RacsConfig {
                k,
                host: "127.0.0.1".to_string(),
                port: 0,
                m,
                proxy_host: None,
                proxy_port: None,
                minimize_latency_or_bandwidth: ReadPolicy::Latency,
                verify_listings_consistent: false,
                logfile: None,
                unit_test_repositories: true,
                use_zookeeper: false,
                record_stats: false,
            },
            repositories,
            zookeeper: None,
        }
    }

    #[test]
    fn m_defaults_to_total_repository_count_including_inactive() {
        let cfg = config(1, None, vec![repo("r0", true), repo("r1", false), repo("r2", true)]);
        assert_eq!(cfg.m(), 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_m_below_total_repository_count() {
        let cfg = config(1, Some(2), vec![repo("r0", true), repo("r1", false), repo("r2", true)]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_m_above_total_repository_count() {
        let cfg = config(1, Some(4), vec![repo("r0", true), repo("r1", true)]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_non_trailing_inactive_repository_when_m_matches_total() {
        let cfg = config(2, Some(3), vec![repo("r0", false), repo("r1", true), repo("r2", true)]);
        assert!(cfg.validate().is_ok());
    }
}
