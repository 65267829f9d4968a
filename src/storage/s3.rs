//! S3-compatible storage (AWS S3, Storj gateway, MinIO).

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;

use super::{StorageBackend, StorageError};

const BACKEND: &str = "s3";

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3 gateways; enables path-style addressing.
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub presign_ttl: Duration,
}

pub struct S3Storage {
    client: Client,
    bucket: String,
    presign_ttl: Duration,
}

impl S3Storage {
    pub fn new(config: S3Config) -> Result<Self, StorageError> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::Config("S3_BUCKET is required".into()));
        }
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "catalog-harvest",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            presign_ttl: config.presign_ttl,
        })
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(StorageError::backend(BACKEND, e))
                }
            }
        }
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String, StorageError> {
        let len = data.len() as i64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(len)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        self.reference_for(key).await
    }

    /// Presigned GET URL, valid for the configured TTL.
    async fn reference_for(&self, key: &str) -> Result<String, StorageError> {
        let presign = PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        let req = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign)
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        Ok(req.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            bucket: "media".into(),
            region: "us-east-1".into(),
            endpoint: Some("http://localhost:9000".into()),
            access_key_id: "minioadmin".into(),
            secret_access_key: "minioadmin".into(),
            presign_ttl: Duration::from_secs(3600),
        }
    }

    #[test]
    fn empty_bucket_is_rejected() {
        let err = S3Storage::new(S3Config {
            bucket: " ".into(),
            ..config()
        })
        .err()
        .unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn presigned_reference_targets_the_key() {
        let storage = S3Storage::new(config()).unwrap();
        let url = storage.reference_for("comic/X1/X1_01.jpg").await.unwrap();
        assert!(url.starts_with("http://localhost:9000/media/comic/X1/X1_01.jpg?"));
        assert!(url.contains("X-Amz-Expires=3600"));
    }
}
