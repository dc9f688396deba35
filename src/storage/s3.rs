//! S3-compatible object storage client.
//!
//! Works against AWS S3 and self-hosted stores (MinIO, OSS S3 endpoints) by
//! pointing `endpoint` at the store and enabling path-style addressing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{
    Credentials, ProvideCredentials, Region, RequestChecksumCalculation, SharedCredentialsProvider,
};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::SinkError;
use crate::models::ObjectStorageConfig;
use crate::storage::ObjectStore;

/// `ObjectStore` backed by the AWS SDK.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from configuration.
    ///
    /// Static keys are used when present; otherwise the AWS default
    /// credential chain applies. Credentials are resolved once here, so a
    /// store without usable credentials fails as a configuration error.
    pub async fn connect(config: &ObjectStorageConfig) -> Result<Self, SinkError> {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .operation_attempt_timeout(Duration::from_secs(config.timeout_secs))
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url())
            .timeout_config(timeouts);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.as_str(),
                secret_key.as_str(),
                None,
                None,
                "crawl-sink",
            ));
        }

        let sdk_config = loader.load().await;
        check_credentials(sdk_config.credentials_provider()).await?;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            // Self-hosted stores reject the chunked checksum encoding.
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();

        log::info!(
            "S3 client ready for {} (region {})",
            config.endpoint_url(),
            config.region
        );
        Ok(Self::new(Client::from_conf(s3_config)))
    }
}

async fn check_credentials(provider: Option<SharedCredentialsProvider>) -> Result<(), SinkError> {
    let provider =
        provider.ok_or_else(|| SinkError::config("object storage has no credentials provider"))?;
    provider.provide_credentials().await.map_err(|e| {
        SinkError::config(format!(
            "object storage credentials unavailable: {}",
            DisplayErrorContext(&e)
        ))
    })?;
    Ok(())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), SinkError> {
        let length = body.len();

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(length as i64)
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| SinkError::backend("s3", DisplayErrorContext(&e)))?;

        log::debug!("Wrote {} bytes to s3://{}/{}", length, bucket, key);
        Ok(())
    }
}
