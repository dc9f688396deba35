//! Backend contracts used by the sinks.
//!
//! Each sink needs exactly one capability from its backend:
//!
//! ```text
//! ObjectStorageSink ── ObjectStore::put(bucket, key, body, metadata)
//! MessageQueueSink  ── MessageQueue::publish(topic, payload)   (waits for ack;
//!                      RestProducer for Kafka, MnsProducer for MNS)
//! DedupeFilterSink  ── DedupeIndex::exists(collection, id)
//! LocalFileSink     ── LocalStorage (tokio::fs)
//! ```
//!
//! Remote clients are created lazily through a [`ClientCache`].

pub mod cache;
pub mod elastic;
pub mod local;
pub mod mns;
pub mod queue;
#[cfg(feature = "s3")]
pub mod s3;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SinkError;

// Re-export for convenience
pub use cache::ClientCache;
pub use elastic::ElasticIndex;
pub use local::LocalStorage;
pub use mns::MnsProducer;
pub use queue::RestProducer;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

/// Blob store with a single upload operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` under `key`. The content length is `body.len()`.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), SinkError>;
}

/// Message broker producer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publish `payload` to `topic` and return once the broker acknowledged it.
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), SinkError>;
}

/// Index of already-seen item keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DedupeIndex: Send + Sync {
    /// Whether a document with `id` exists in `collection`.
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, SinkError>;
}
