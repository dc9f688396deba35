//! Announces queueable items on a message queue topic.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::{CrawlContext, ItemRef, QueueBackend, QueueConfig};
use crate::pipeline::{Sink, SinkOutcome};
use crate::storage::{ClientCache, MessageQueue, MnsProducer, RestProducer};

/// Publishes `queue_message` for each queueable item and forwards it only
/// after the broker acknowledged the write.
pub struct MessageQueueSink {
    topic: String,
    backend: QueueBackend,
    client: ClientCache<dyn MessageQueue>,
}

impl MessageQueueSink {
    pub fn new(
        topic: impl Into<String>,
        backend: QueueBackend,
        client: ClientCache<dyn MessageQueue>,
    ) -> Self {
        Self {
            topic: topic.into(),
            backend,
            client,
        }
    }

    /// Build the sink with a lazily connected producer for `queue.backend`.
    pub fn from_config(config: &QueueConfig) -> Result<Self, SinkError> {
        config.validate()?;
        let settings = config.clone();
        let client = ClientCache::new("message queue", move || {
            let settings = settings.clone();
            async move {
                let producer: Arc<dyn MessageQueue> = match settings.backend {
                    QueueBackend::Kafka => Arc::new(RestProducer::connect(&settings).await?),
                    QueueBackend::Mns => Arc::new(MnsProducer::connect(&settings).await?),
                };
                Ok(producer)
            }
        });
        log::info!(
            "MessageQueueSink publishing to {} {} (ssl={})",
            config.backend.as_str(),
            config.topic,
            config.ssl_enable
        );
        Ok(Self::new(config.topic.clone(), config.backend, client))
    }

    pub fn with_producer(
        topic: impl Into<String>,
        backend: QueueBackend,
        producer: Arc<dyn MessageQueue>,
    ) -> Self {
        Self::new(topic, backend, ClientCache::ready("message queue", producer))
    }
}

#[async_trait]
impl Sink for MessageQueueSink {
    fn name(&self) -> &str {
        "MessageQueueSink"
    }

    async fn process(&self, item: ItemRef, ctx: &CrawlContext) -> Result<SinkOutcome, SinkError> {
        let Some(queueable) = item.queueable() else {
            return Ok(SinkOutcome::Forward(item));
        };

        let message = queueable.queue_message(ctx, self.backend);
        let producer = self.client.get().await?;
        producer.publish(&self.topic, message).await?;
        log::debug!("Announced {} on {}", item.id(), self.topic);

        Ok(SinkOutcome::Forward(item))
    }
}
