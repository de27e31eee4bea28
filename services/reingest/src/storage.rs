//! Durable object storage for backup and quarantine objects.

use crate::config::Config;
use crate::error::StorageError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, instrument};

/// Fetch, write and delete objects by bucket and key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an entire object into memory
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Write an object, replacing any existing one
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Remove an object
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}

/// [`ObjectStore`] backed by Amazon S3
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create an S3 store for the configured region
    pub async fn new(config: &Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.s3_endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.s3_force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(region = %config.region, "S3 object store initialized");

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false);
                let status = e.raw_response().map(|r| r.status().as_u16());

                if not_found || status == Some(404) {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else if status == Some(403) {
                    StorageError::AccessDenied {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Request(DisplayErrorContext(&e).to_string())
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Body(e.to_string()))?
            .into_bytes();

        debug!(size_bytes = body.len(), "Fetched object from S3");
        Ok(body)
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Request(DisplayErrorContext(&e).to_string()))?;

        debug!("Wrote object to S3");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Request(DisplayErrorContext(&e).to_string()))?;

        debug!("Deleted object from S3");
        Ok(())
    }
}
