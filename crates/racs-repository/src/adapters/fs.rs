//! Filesystem repository adapter, grounded directly on the reference
//! `FSRepository` (§4.1, §6, §8).
//!
//! Data lives at `<base>/<quoted-bucket>/<quoted-key>`; a sidecar
//! `.meta` file next to it carries `(content_type, headers, etag)` in
//! `bincode`. There is a window between writing the data file and the
//! sidecar in which they disagree; this is accepted, matching the
//! source (§9).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use racs_common::{BucketName, ObjectKey, RacsError, Result, UserMetadata};
use serde::{Deserialize, Serialize};

use crate::listing::select_keys;
use crate::quoting::{FS_SPECIAL, quote, unquote};
use crate::repository::{BucketListing, ObjectMetaData, RepoAttrs, Repository};

#[derive(Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
    metadata: UserMetadata,
    etag: String,
}

pub struct FsRepository {
    name: String,
    base: PathBuf,
    attrs: RepoAttrs,
}

impl FsRepository {
    pub fn new(name: impl Into<String>, base_directory: impl AsRef<Path>, priority: i32, active: bool) -> Result<Self> {
        let base = base_directory
            .as_ref()
            .canonicalize()
            .map_err(|e| RacsError::Configuration(format!("fs repository base directory: {e}")))?;
        Ok(Self {
            name: name.into(),
            base,
            attrs: RepoAttrs::new(priority, active),
        })
    }

    fn bucket_path(&self, bucket: &BucketName) -> PathBuf {
        self.base.join(quote(bucket.as_str(), FS_SPECIAL))
    }

    fn key_path(&self, bucket: &BucketName, key: &ObjectKey) -> PathBuf {
        self.bucket_path(bucket).join(quote(key.as_str(), FS_SPECIAL))
    }

    fn meta_path(&self, bucket: &BucketName, key: &ObjectKey) -> PathBuf {
        let mut p = self.key_path(bucket, key).into_os_string();
        p.push(".meta");
        PathBuf::from(p)
    }

    async fn require_bucket(&self, bucket: &BucketName) -> Result<PathBuf> {
        let bp = self.bucket_path(bucket);
        if !tokio::fs::try_exists(&bp).await? {
            return Err(RacsError::NoSuchBucket(bucket.as_str().to_string()));
        }
        Ok(bp)
    }

    async fn require_object(&self, bucket: &BucketName, key: &ObjectKey) -> Result<PathBuf> {
        let kp = self.key_path(bucket, key);
        if !tokio::fs::try_exists(&kp).await? {
            return Err(RacsError::NotFound {
                bucket: bucket.as_str().to_string(),
                key: key.as_str().to_string(),
            });
        }
        Ok(kp)
    }

    async fn read_sidecar(&self, bucket: &BucketName, key: &ObjectKey) -> Result<Sidecar> {
        let bytes = tokio::fs::read(self.meta_path(bucket, key)).await?;
        bincode::deserialize(&bytes)
            .map_err(|e| RacsError::Adapter(format!("corrupt sidecar metadata: {e}")))
    }

    async fn write_sidecar(&self, bucket: &BucketName, key: &ObjectKey, sidecar: &Sidecar) -> Result<()> {
        let bytes = bincode::serialize(sidecar)
            .map_err(|e| RacsError::Adapter(format!("failed to serialize sidecar metadata: {e}")))?;
        tokio::fs::write(self.meta_path(bucket, key), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for FsRepository {
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

    async fn create_bucket(&self, bucket: &BucketName) -> Result<()> {
        let bp = self.bucket_path(bucket);
        if !tokio::fs::try_exists(&bp).await? {
            tokio::fs::create_dir(&bp).await?;
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &BucketName) -> Result<()> {
        let bp = self.require_bucket(bucket).await?;
        match tokio::fs::remove_dir(&bp).await {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(39) /* ENOTEMPTY */ => {
                Err(RacsError::BucketNotEmpty(bucket.as_str().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        data: Bytes,
        content_type: Option<String>,
        metadata: UserMetadata,
    ) -> Result<()> {
        self.require_bucket(bucket).await?;
        let kp = self.key_path(bucket, key);

        let mut hasher = md5::Md5::default();
        use md5::Digest;
        hasher.update(&data);
        let etag = hex::encode(hasher.finalize());

        tokio::fs::write(&kp, &data).await?;
        self.write_sidecar(
            bucket,
            key,
            &Sidecar {
                content_type,
                metadata,
                etag,
            },
        )
        .await
    }

    async fn get_object(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> Result<(Bytes, Option<String>, UserMetadata)> {
        let kp = self.require_object(bucket, key).await?;
        let data = tokio::fs::read(kp).await?;
        let sidecar = self.read_sidecar(bucket, key).await?;
        Ok((Bytes::from(data), sidecar.content_type, sidecar.metadata))
    }

    async fn head(&self, bucket: &BucketName, key: &ObjectKey) -> Result<UserMetadata> {
        let kp = self.require_object(bucket, key).await?;
        let sidecar = self.read_sidecar(bucket, key).await?;
        let stat = tokio::fs::metadata(&kp).await?;
        let modified_unix = stat
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);

        let mut headers = UserMetadata::new();
        if let Some(ct) = &sidecar.content_type {
            headers.insert("Content-Type".to_string(), ct.clone());
        }
        headers.insert(
            "Last-Modified".to_string(),
            racs_common::timefmt::http_date(modified_unix),
        );
        headers.insert("Etag".to_string(), format!("\"{}\"", sidecar.etag));
        headers.insert("Content-Length".to_string(), stat.len().to_string());
        headers.extend(sidecar.metadata);
        Ok(headers)
    }

    async fn delete_object(&self, bucket: &BucketName, key: &ObjectKey) -> Result<()> {
        self.require_bucket(bucket).await?;
        let kp = self.key_path(bucket, key);
        if tokio::fs::try_exists(&kp).await? {
            tokio::fs::remove_file(&kp).await?;
        }
        let mp = self.meta_path(bucket, key);
        if tokio::fs::try_exists(&mp).await? {
            tokio::fs::remove_file(&mp).await?;
        }
        Ok(())
    }

    async fn list_bucket(
        &self,
        bucket: &BucketName,
        prefix: Option<&str>,
        marker: Option<&str>,
        delimiter: Option<&str>,
        max_keys: Option<usize>,
    ) -> Result<BucketListing> {
        let bp = self.require_bucket(bucket).await?;
        let mut dir = tokio::fs::read_dir(&bp).await?;
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let fname = entry.file_name();
            let fname = fname.to_string_lossy();
            if fname.ends_with(".meta") {
                continue;
            }
            keys.push(unquote(&fname));
        }

        let (matched, common_prefixes) = select_keys(keys, prefix, marker, delimiter, max_keys);

        let mut entries = Vec::with_capacity(matched.len());
        for k in matched {
            let key = ObjectKey::from(k.clone());
            let sidecar = self.read_sidecar(bucket, &key).await?;
            let stat = tokio::fs::metadata(self.key_path(bucket, &key)).await?;
            let modified_unix = stat
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64);
            entries.push(ObjectMetaData {
                key,
                last_modified_unix: modified_unix,
                etag: sidecar.etag,
                size: stat.len(),
                content_type: sidecar.content_type,
                metadata: sidecar.metadata,
            });
        }

        Ok(BucketListing {
            entries,
            common_prefixes,
        })
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let mut dir = tokio::fs::read_dir(&self.base).await?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            names.push(unquote(&entry.file_name().to_string_lossy()));
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (FsRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::new("fs0", dir.path(), 0, true).unwrap();
        (repo, dir)
    }

    #[tokio::test]
    async fn create_bucket_is_idempotent() {
        let (repo, _dir) = repo();
        let bucket = BucketName::from("b".to_string());
        repo.create_bucket(&bucket).await.unwrap();
        repo.create_bucket(&bucket).await.unwrap();
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let (repo, _dir) = repo();
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());
        repo.create_bucket(&bucket).await.unwrap();
        repo.put_object(&bucket, &key, Bytes::from_static(b"hello"), Some("text/plain".into()), UserMetadata::new())
            .await
            .unwrap();

        let (data, content_type, _meta) = repo.get_object(&bucket, &key).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"hello"));
        assert_eq!(content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn delete_bucket_fails_when_not_empty() {
        let (repo, _dir) = repo();
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("k".to_string());
        repo.create_bucket(&bucket).await.unwrap();
        repo.put_object(&bucket, &key, Bytes::from_static(b"x"), None, UserMetadata::new())
            .await
            .unwrap();

        let err = repo.delete_bucket(&bucket).await.unwrap_err();
        assert!(matches!(err, RacsError::BucketNotEmpty(_)));
    }

    #[tokio::test]
    async fn delete_nonexistent_object_is_idempotent() {
        let (repo, _dir) = repo();
        let bucket = BucketName::from("b".to_string());
        let key = ObjectKey::from("missing".to_string());
        repo.create_bucket(&bucket).await.unwrap();
        repo.delete_object(&bucket, &key).await.unwrap();
    }

    #[tokio::test]
    async fn delete_bucket_nonexistent_is_nosuchbucket() {
        let (repo, _dir) = repo();
        let bucket = BucketName::from("nope".to_string());
        let err = repo.delete_bucket(&bucket).await.unwrap_err();
        assert!(matches!(err, RacsError::NoSuchBucket(_)));
    }
}
