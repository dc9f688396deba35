// src/models/mod.rs

//! Domain models: items, the crawl context, and pipeline configuration.

mod config;
mod context;
mod item;

// Re-export all public types
pub use config::{
    ChainConfig, ContextConfig, DedupeConfig, ENV_DEDUPE_URL, ENV_MNS_ACCESS_KEY_SECRET,
    ENV_QUEUE_PASSWORD, ENV_S3_ACCESS_KEY, ENV_S3_SECRET_KEY, LocalFileConfig, MnsConfig,
    ObjectStorageConfig, PipelineConfig, QueueBackend, QueueConfig, SinkKind, validate_spider,
};
pub use context::CrawlContext;
pub use item::{
    BINARY_KIND, BinaryItem, DEDUPABLE_BINARY_KIND, Dedupable, DedupableBinaryItem, Item,
    ItemRecord, ItemRef, Payload, Queueable, RecordError, Storable, TEXT_KIND, TextItem,
};
