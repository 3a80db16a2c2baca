//! Builds a `Repository` from a `[[repository]]` config entry.
//!
//! The Python source resolves a repository's class dynamically with
//! `eval()` against the configured class name; that reflective
//! dispatch also meant the config file could name, and thus
//! instantiate, anything importable, including things never intended
//! as a repository backend. Here the mapping is a fixed, exhaustive
//! match over `RepositoryClass` instead — a closed table, not an
//! open-ended string-to-code bridge.

use std::sync::Arc;

use racs_common::config::{RepositoryClass, RepositoryConfig};
use racs_common::{RacsError, Result};

use crate::adapters::cloudfiles::CloudFilesRepository;
use crate::adapters::fs::FsRepository;
use crate::adapters::s3::S3Repository;
use crate::repository::Repository;

pub fn build_repository(cfg: &RepositoryConfig) -> Result<Arc<dyn Repository>> {
    let priority = cfg.priority;
    match cfg.class {
        RepositoryClass::Fs => {
            let base = cfg.base_directory.as_ref().ok_or_else(|| {
                RacsError::Configuration(format!("repository '{}': base_directory is required for class=fs", cfg.name))
            })?;
            let repo = FsRepository::new(cfg.name.clone(), base, priority, cfg.active)?;
            Ok(Arc::new(repo))
        }
        RepositoryClass::S3 => {
            let endpoint = cfg.endpoint.clone().ok_or_else(|| {
                RacsError::Configuration(format!("repository '{}': endpoint is required for class=s3", cfg.name))
            })?;
            let access_key = cfg.access_key.clone().ok_or_else(|| {
                RacsError::Configuration(format!("repository '{}': access_key is required for class=s3", cfg.name))
            })?;
            let secret_key = cfg.secret_key.clone().ok_or_else(|| {
                RacsError::Configuration(format!("repository '{}': secret_key is required for class=s3", cfg.name))
            })?;
            let bucket_prefix = cfg.bucket_prefix.clone().unwrap_or_default();
            Ok(Arc::new(S3Repository::new(
                cfg.name.clone(),
                endpoint,
                access_key,
                secret_key,
                bucket_prefix,
                priority,
                cfg.active,
            )))
        }
        RepositoryClass::Cloudfiles => {
            let endpoint = cfg.endpoint.clone().ok_or_else(|| {
                RacsError::Configuration(format!("repository '{}': endpoint is required for class=cloudfiles", cfg.name))
            })?;
            let username = cfg.username.clone().ok_or_else(|| {
                RacsError::Configuration(format!("repository '{}': username is required for class=cloudfiles", cfg.name))
            })?;
            let api_key = cfg.api_key.clone().ok_or_else(|| {
                RacsError::Configuration(format!("repository '{}': api_key is required for class=cloudfiles", cfg.name))
            })?;
            let container_prefix = cfg.container_prefix.clone().unwrap_or_default();
            Ok(Arc::new(CloudFilesRepository::new(
                cfg.name.clone(),
                endpoint,
                username,
                api_key,
                container_prefix,
                priority,
                cfg.active,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racs_common::config::RepositoryConfig;

    #[test]
    fn fs_requires_base_directory() {
        let cfg = RepositoryConfig {
            name: "r0".to_string(),
            class: RepositoryClass::Fs,
            active: true,
            priority: 0,
            base_directory: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            bucket_prefix: None,
            username: None,
            api_key: None,
            container_prefix: None,
        };
        let err = build_repository(&cfg).unwrap_err();
        assert!(matches!(err, RacsError::Configuration(_)));
    }
}
