//! Drops items whose dedupe key is already known to the index.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::{CrawlContext, DedupeConfig, ItemRef};
use crate::pipeline::{Sink, SinkOutcome};
use crate::storage::{ClientCache, DedupeIndex, ElasticIndex};

/// Filters items of one kind against an index of already-seen keys.
///
/// Only checks. Recording new keys belongs to whatever consumes the
/// persisted items downstream.
pub struct DedupeFilterSink {
    collection: String,
    target_kind: String,
    client: ClientCache<dyn DedupeIndex>,
}

impl DedupeFilterSink {
    pub fn new(
        collection: impl Into<String>,
        target_kind: impl Into<String>,
        client: ClientCache<dyn DedupeIndex>,
    ) -> Self {
        Self {
            collection: collection.into(),
            target_kind: target_kind.into(),
            client,
        }
    }

    /// Build the sink with a lazily connected index client.
    pub fn from_config(config: &DedupeConfig) -> Result<Self, SinkError> {
        config.validate()?;
        let settings = config.clone();
        let client = ClientCache::new("dedupe index", move || {
            let settings = settings.clone();
            async move {
                let index: Arc<dyn DedupeIndex> = Arc::new(ElasticIndex::connect(&settings).await?);
                Ok(index)
            }
        });
        log::info!(
            "DedupeFilterSink checking {} items against {}",
            config.target_kind,
            config.index
        );
        Ok(Self::new(config.index.clone(), config.target_kind.clone(), client))
    }

    pub fn with_index(
        collection: impl Into<String>,
        target_kind: impl Into<String>,
        index: Arc<dyn DedupeIndex>,
    ) -> Self {
        Self::new(collection, target_kind, ClientCache::ready("dedupe index", index))
    }
}

#[async_trait]
impl Sink for DedupeFilterSink {
    fn name(&self) -> &str {
        "DedupeFilterSink"
    }

    async fn process(&self, item: ItemRef, _ctx: &CrawlContext) -> Result<SinkOutcome, SinkError> {
        if item.kind() != self.target_kind {
            return Ok(SinkOutcome::Forward(item));
        }
        let Some(dedupable) = item.dedupable() else {
            return Ok(SinkOutcome::Forward(item));
        };

        let key = dedupable.dedupe_key();
        let index = self.client.get().await?;
        if index.exists(&self.collection, key).await? {
            log::info!("Skipping {}: key {} already in {}", item.id(), key, self.collection);
            return Ok(SinkOutcome::Drop);
        }

        log::debug!("Key {} not seen before", key);
        Ok(SinkOutcome::Forward(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::{BinaryItem, DEDUPABLE_BINARY_KIND, TextItem};
    use crate::storage::MockDedupeIndex;

    fn ctx() -> CrawlContext {
        CrawlContext::new("torrents")
    }

    fn item(key: &str) -> ItemRef {
        Arc::new(BinaryItem::new("https://example.com/t.torrent", b"d4:info".to_vec()).with_dedupe_key(key))
    }

    fn index_answering(found: bool) -> MockDedupeIndex {
        let mut index = MockDedupeIndex::new();
        index
            .expect_exists()
            .withf(|collection, id| collection == "seen" && id == "h1")
            .times(1)
            .returning(move |_, _| Ok(found));
        index
    }

    #[tokio::test]
    async fn test_known_key_is_dropped() {
        let sink = DedupeFilterSink::with_index("seen", DEDUPABLE_BINARY_KIND, Arc::new(index_answering(true)));
        let outcome = sink.process(item("h1"), &ctx()).await.unwrap();
        assert!(matches!(outcome, SinkOutcome::Drop));
    }

    #[tokio::test]
    async fn test_new_key_is_forwarded() {
        let sink = DedupeFilterSink::with_index("seen", DEDUPABLE_BINARY_KIND, Arc::new(index_answering(false)));
        let input = item("h1");
        match sink.process(Arc::clone(&input), &ctx()).await.unwrap() {
            SinkOutcome::Forward(forwarded) => assert!(Arc::ptr_eq(&forwarded, &input)),
            SinkOutcome::Drop => panic!("new key must be forwarded"),
        }
    }

    #[tokio::test]
    async fn test_lookup_error_is_not_treated_as_absent() {
        let mut index = MockDedupeIndex::new();
        index
            .expect_exists()
            .returning(|_, _| Err(SinkError::backend("dedupe index", "HTTP 503")));

        let sink = DedupeFilterSink::with_index("seen", DEDUPABLE_BINARY_KIND, Arc::new(index));
        let err = sink.process(item("h1"), &ctx()).await.unwrap_err();
        assert!(matches!(err, SinkError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_other_kinds_skip_the_lookup() {
        let mut index = MockDedupeIndex::new();
        index.expect_exists().never();
        let sink = DedupeFilterSink::with_index("seen", DEDUPABLE_BINARY_KIND, Arc::new(index));

        let text: ItemRef = Arc::new(TextItem::new("https://example.com/a", "x"));
        let plain: ItemRef = Arc::new(BinaryItem::new("https://example.com/b", vec![1u8]));
        for input in [text, plain] {
            match sink.process(Arc::clone(&input), &ctx()).await.unwrap() {
                SinkOutcome::Forward(forwarded) => assert!(Arc::ptr_eq(&forwarded, &input)),
                SinkOutcome::Drop => panic!("{} must pass through", input.kind()),
            }
        }
    }

    #[tokio::test]
    async fn test_configured_kind_without_key_passes_through() {
        let mut index = MockDedupeIndex::new();
        index.expect_exists().never();
        let sink = DedupeFilterSink::with_index("seen", "text", Arc::new(index));

        let outcome = sink
            .process(Arc::new(TextItem::new("https://example.com/a", "x")), &ctx())
            .await
            .unwrap();
        assert!(matches!(outcome, SinkOutcome::Forward(_)));
    }
}
