//! Uploads storable items to S3-compatible object storage.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::{CrawlContext, ItemRef, ObjectStorageConfig};
use crate::pipeline::{Sink, SinkOutcome};
use crate::storage::{ClientCache, ObjectStore};

/// Writes each storable item to `{bucket}/{prefix}/{filepath}`.
///
/// The store client is built on the first applicable item and reused for
/// every item after that.
pub struct ObjectStorageSink {
    config: ObjectStorageConfig,
    client: ClientCache<dyn ObjectStore>,
}

impl ObjectStorageSink {
    pub fn new(config: ObjectStorageConfig, client: ClientCache<dyn ObjectStore>) -> Self {
        Self { config, client }
    }

    /// Build the sink with a lazily connected S3 client.
    #[cfg(feature = "s3")]
    pub fn from_config(config: &ObjectStorageConfig) -> Result<Self, SinkError> {
        use crate::storage::S3ObjectStore;

        config.validate()?;
        let settings = config.clone();
        let client = ClientCache::new("object storage", move || {
            let settings = settings.clone();
            async move {
                let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::connect(&settings).await?);
                Ok(store)
            }
        });
        log::info!(
            "ObjectStorageSink targeting bucket {} at {}",
            config.bucket,
            config.endpoint_url()
        );
        Ok(Self::new(config.clone(), client))
    }

    #[cfg(not(feature = "s3"))]
    pub fn from_config(config: &ObjectStorageConfig) -> Result<Self, SinkError> {
        config.validate()?;
        Err(SinkError::config(
            "object storage requires the `s3` feature",
        ))
    }

    /// Build the sink around an existing store.
    pub fn with_store(config: ObjectStorageConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self::new(config, ClientCache::ready("object storage", store))
    }
}

#[async_trait]
impl Sink for ObjectStorageSink {
    fn name(&self) -> &str {
        "ObjectStorageSink"
    }

    async fn process(&self, item: ItemRef, ctx: &CrawlContext) -> Result<SinkOutcome, SinkError> {
        let Some(storable) = item.storable() else {
            return Ok(SinkOutcome::Forward(item));
        };

        let key = self.config.object_key(&storable.filepath(ctx));
        let payload = storable.payload();
        let content_type = payload.content_type();
        let body = payload.as_bytes().to_vec();
        let metadata = storable.metadata();

        let store = self.client.get().await?;
        store
            .put(&self.config.bucket, &key, body, content_type, metadata)
            .await?;
        log::debug!("Uploaded {} to {}/{}", item.id(), self.config.bucket, key);

        Ok(SinkOutcome::Forward(item))
    }
}
