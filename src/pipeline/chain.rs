//! Ordered sink chain.
//!
//! Each item visits the sinks in declared order. `Forward` moves it to the
//! next sink, `Drop` ends its journey quietly, and an error ends it with a
//! report naming the failing sink. Nothing is rolled back: sinks that
//! already ran keep their side effects.

use std::sync::Arc;

use crate::error::{ChainError, Result, SinkError};
use crate::models::{CrawlContext, ItemRef, PipelineConfig, SinkKind};
use crate::pipeline::{
    DedupeFilterSink, LocalFileSink, MessageQueueSink, ObjectStorageSink, Sink, SinkOutcome,
};

/// Where an item ended up.
#[derive(Debug)]
pub enum ChainOutcome {
    /// Every sink forwarded the item.
    Persisted(ItemRef),
    /// A sink discarded the item; later sinks never saw it.
    Dropped {
        index: usize,
        sink: String,
        item: ItemRef,
    },
    /// A sink failed; later sinks never saw the item. Carries the item as
    /// it entered the chain.
    Failed {
        index: usize,
        sink: String,
        item: ItemRef,
        error: SinkError,
    },
}

impl ChainOutcome {
    /// `Ok(Some(item))` when persisted, `Ok(None)` when dropped.
    pub fn into_result(self) -> std::result::Result<Option<ItemRef>, ChainError> {
        match self {
            ChainOutcome::Persisted(item) => Ok(Some(item)),
            ChainOutcome::Dropped { .. } => Ok(None),
            ChainOutcome::Failed {
                index,
                sink,
                item,
                error,
            } => Err(ChainError {
                index,
                sink,
                item_id: item.id().to_string(),
                source: error,
            }),
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, ChainOutcome::Persisted(_))
    }
}

/// Counts for a batch of items.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub persisted: usize,
    pub dropped: usize,
    pub failures: Vec<ChainError>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: ChainOutcome) {
        match outcome.into_result() {
            Ok(Some(_)) => self.persisted += 1,
            Ok(None) => self.dropped += 1,
            Err(e) => self.failures.push(e),
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.persisted + self.dropped + self.failed()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An ordered list of sinks.
pub struct Chain {
    sinks: Vec<Box<dyn Sink>>,
}

impl Chain {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// Validate the configuration and build the enabled sinks in
    /// `pipeline.order`. Remote clients connect on first use.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder();
        for kind in config.enabled_sinks() {
            builder = match kind {
                SinkKind::Local => builder.add_sink(LocalFileSink::from_config(&config.local)?),
                SinkKind::ObjectStorage => {
                    builder.add_sink(ObjectStorageSink::from_config(&config.object_storage)?)
                }
                SinkKind::Queue => builder.add_sink(MessageQueueSink::from_config(&config.queue)?),
                SinkKind::Dedupe => builder.add_sink(DedupeFilterSink::from_config(&config.dedupe)?),
            };
        }

        let chain = builder.build();
        if chain.is_empty() {
            log::warn!("No sinks enabled; items will pass through untouched");
        } else {
            log::info!("Pipeline chain: {}", chain.sink_names().join(" -> "));
        }
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|sink| sink.name()).collect()
    }

    /// Run one item through every sink, stopping at the first drop or failure.
    pub async fn run(&self, item: ItemRef, ctx: &CrawlContext) -> ChainOutcome {
        let mut current = Arc::clone(&item);

        for (index, sink) in self.sinks.iter().enumerate() {
            match sink.process(current.clone(), ctx).await {
                Ok(SinkOutcome::Forward(next)) => current = next,
                Ok(SinkOutcome::Drop) => {
                    log::debug!("{} dropped {} at #{}", sink.name(), current.id(), index);
                    return ChainOutcome::Dropped {
                        index,
                        sink: sink.name().to_string(),
                        item: current,
                    };
                }
                Err(error) => {
                    log::error!(
                        "{} failed for {} at #{}: {}",
                        sink.name(),
                        current.id(),
                        index,
                        error
                    );
                    return ChainOutcome::Failed {
                        index,
                        sink: sink.name().to_string(),
                        item,
                        error,
                    };
                }
            }
        }

        ChainOutcome::Persisted(current)
    }

    /// Run items one after another and tally the outcomes.
    pub async fn run_all<I>(&self, items: I, ctx: &CrawlContext) -> RunSummary
    where
        I: IntoIterator<Item = ItemRef>,
    {
        let mut summary = RunSummary::default();
        for item in items {
            summary.record(self.run(item, ctx).await);
        }
        summary
    }
}

/// Programmatic chain assembly.
#[derive(Default)]
pub struct ChainBuilder {
    sinks: Vec<Box<dyn Sink>>,
}

impl ChainBuilder {
    pub fn add_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn add_boxed(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Chain {
        Chain::new(self.sinks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::models::TextItem;

    #[derive(Clone, Copy)]
    enum Behavior {
        Forward,
        Drop,
        Fail,
    }

    struct RecordingSink {
        name: String,
        behavior: Behavior,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSink {
        fn new(name: &str, behavior: Behavior, seen: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                behavior,
                seen: Arc::clone(seen),
            }
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn process(
            &self,
            item: ItemRef,
            _ctx: &CrawlContext,
        ) -> std::result::Result<SinkOutcome, SinkError> {
            self.seen.lock().unwrap().push(self.name.clone());
            match self.behavior {
                Behavior::Forward => Ok(SinkOutcome::Forward(item)),
                Behavior::Drop => Ok(SinkOutcome::Drop),
                Behavior::Fail => Err(SinkError::backend("fake", "boom")),
            }
        }
    }

    fn item() -> ItemRef {
        Arc::new(TextItem::new("https://example.com/a", "hello"))
    }

    fn ctx() -> CrawlContext {
        CrawlContext::new("books")
    }

    #[tokio::test]
    async fn test_empty_chain_persists_unchanged() {
        let chain = Chain::builder().build();
        let input = item();
        match chain.run(Arc::clone(&input), &ctx()).await {
            ChainOutcome::Persisted(out) => assert!(Arc::ptr_eq(&out, &input)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_forward_visits_every_sink_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::builder()
            .add_sink(RecordingSink::new("a", Behavior::Forward, &seen))
            .add_sink(RecordingSink::new("b", Behavior::Forward, &seen))
            .add_sink(RecordingSink::new("c", Behavior::Forward, &seen))
            .build();

        assert!(chain.run(item(), &ctx()).await.is_persisted());
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_drop_short_circuits() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::builder()
            .add_sink(RecordingSink::new("a", Behavior::Forward, &seen))
            .add_sink(RecordingSink::new("filter", Behavior::Drop, &seen))
            .add_sink(RecordingSink::new("c", Behavior::Forward, &seen))
            .build();

        match chain.run(item(), &ctx()).await {
            ChainOutcome::Dropped { index, sink, .. } => {
                assert_eq!(index, 1);
                assert_eq!(sink, "filter");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "filter"]);
    }

    #[tokio::test]
    async fn test_failure_short_circuits_and_names_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::builder()
            .add_sink(RecordingSink::new("a", Behavior::Forward, &seen))
            .add_sink(RecordingSink::new("b", Behavior::Fail, &seen))
            .add_sink(RecordingSink::new("c", Behavior::Forward, &seen))
            .build();

        let input = item();
        let outcome = chain.run(Arc::clone(&input), &ctx()).await;
        match &outcome {
            ChainOutcome::Failed { index, sink, item, .. } => {
                assert_eq!(*index, 1);
                assert_eq!(sink, "b");
                assert!(Arc::ptr_eq(item, &input));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);

        let err = outcome.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "item https://example.com/a failed at sink b (#1): fake error: boom"
        );
    }

    #[tokio::test]
    async fn test_run_all_tallies_outcomes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let forward = Chain::builder()
            .add_sink(RecordingSink::new("a", Behavior::Forward, &seen))
            .build();
        let summary = forward.run_all(vec![item(), item()], &ctx()).await;
        assert_eq!(summary.persisted, 2);
        assert!(summary.is_success());

        let failing = Chain::builder()
            .add_boxed(Box::new(RecordingSink::new("x", Behavior::Fail, &seen)))
            .build();
        let summary = failing.run_all(vec![item()], &ctx()).await;
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.total(), 1);
        assert_eq!(summary.failures[0].sink, "x");
    }

    #[test]
    fn test_from_config_follows_declared_order() {
        let tmp = TempDir::new().unwrap();
        let mut config = PipelineConfig::default();
        config.pipeline.order = vec![SinkKind::Queue, SinkKind::Local, SinkKind::Dedupe];
        config.local.enabled = true;
        config.local.root_dir = tmp.path().to_path_buf();
        config.queue.enabled = true;
        config.queue.servers = vec!["http://broker:8082".into()];
        config.queue.topic = "items".into();
        config.dedupe.enabled = true;
        config.dedupe.url = "http://search:9200".into();
        config.dedupe.index = "seen".into();

        let chain = Chain::from_config(&config).unwrap();
        assert_eq!(
            chain.sink_names(),
            vec!["MessageQueueSink", "LocalFileSink", "DedupeFilterSink"]
        );
    }

    #[test]
    fn test_from_config_skips_disabled_sinks() {
        let chain = Chain::from_config(&PipelineConfig::default()).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_from_config_fails_fast_on_invalid_sink() {
        let mut config = PipelineConfig::default();
        config.queue.enabled = true;
        config.queue.servers = vec!["http://broker:8082".into()];

        assert!(Chain::from_config(&config).is_err());
    }

    #[test]
    fn test_chain_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Chain>();
    }
}
