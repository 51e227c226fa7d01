//! Object storage for final video artifacts (S3-compatible)
//!
//! Remote storage is optional: `S3Config::from_env` yields `None` unless the
//! bucket and both credentials are present, and the caller binds an uploader
//! only in that case. Upload failures are reported as errors but the
//! orchestrator treats the whole stage as best-effort.

use crate::{StorageError, StorageResult};
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// S3/MinIO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for `MinIO`, empty for AWS S3
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Config {
    /// Probe the environment once at startup. Returns `None` when the bucket
    /// or either credential is missing; remote upload is then disabled for
    /// the whole process lifetime.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let bucket = std::env::var("S3_BUCKET_NAME").ok().filter(|b| !b.is_empty())?;
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .ok()
            .filter(|k| !k.is_empty())?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .ok()
            .filter(|k| !k.is_empty())?;

        Some(Self {
            bucket,
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: std::env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            access_key_id,
            secret_access_key,
        })
    }
}

/// Object storage trait
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload a local video file, returning its remote URL
    async fn upload_video(&self, local_path: &Path, key: &str) -> StorageResult<String>;

    /// Generate a temporary signed download link
    async fn presigned_download_url(&self, key: &str, expires_in: Duration)
        -> StorageResult<String>;

    /// Delete a stored video
    async fn delete_video(&self, key: &str) -> StorageResult<()>;
}

/// S3 object storage implementation
pub struct S3VideoStorage {
    client: Client,
    bucket: String,
}

impl S3VideoStorage {
    /// Create a new S3 storage client
    #[must_use]
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "avatar-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();

        if let Some(endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for MinIO
        }

        Self {
            client: Client::from_conf(s3_config_builder.build()),
            bucket: config.bucket,
        }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3VideoStorage {
    async fn upload_video(&self, local_path: &Path, key: &str) -> StorageResult<String> {
        if !local_path.exists() {
            return Err(StorageError::NotFound(local_path.display().to_string()));
        }

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("video/mp4")
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        Ok(format!("s3://{}/{}", self.bucket, key))
    }

    async fn presigned_download_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_video(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;
        Ok(())
    }
}

/// Extract the object key from an `s3://bucket/key` URL
#[must_use]
pub fn extract_key_from_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix("s3://")?;
    let (_bucket, key) = rest.split_once('/')?;
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_key_from_url() {
        assert_eq!(
            extract_key_from_url("s3://avatar-videos/j1.mp4"),
            Some("j1.mp4".to_string())
        );
        assert_eq!(
            extract_key_from_url("s3://bucket/videos/j2.mp4"),
            Some("videos/j2.mp4".to_string())
        );
        assert_eq!(extract_key_from_url("s3://bucket/"), None);
        assert_eq!(extract_key_from_url("https://example.com/j1.mp4"), None);
    }

    #[test]
    fn test_s3_config_from_env_requires_full_credentials() {
        // The probe must refuse partial configuration; clear everything first
        // so ambient CI credentials cannot leak in.
        std::env::remove_var("S3_BUCKET_NAME");
        std::env::remove_var("AWS_ACCESS_KEY_ID");
        std::env::remove_var("AWS_SECRET_ACCESS_KEY");
        assert!(S3Config::from_env().is_none());

        std::env::set_var("S3_BUCKET_NAME", "avatar-videos");
        assert!(S3Config::from_env().is_none());

        std::env::set_var("AWS_ACCESS_KEY_ID", "key");
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "secret");
        let config = S3Config::from_env().unwrap();
        assert_eq!(config.bucket, "avatar-videos");

        std::env::remove_var("S3_BUCKET_NAME");
        std::env::remove_var("AWS_ACCESS_KEY_ID");
        std::env::remove_var("AWS_SECRET_ACCESS_KEY");
    }
}
