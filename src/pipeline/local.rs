//! Writes storable items below a local root directory.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::{CrawlContext, ItemRef, LocalFileConfig};
use crate::pipeline::{Sink, SinkOutcome};
use crate::storage::LocalStorage;

/// Persists each storable item at `{root}/{filepath}`.
pub struct LocalFileSink {
    storage: LocalStorage,
}

impl LocalFileSink {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    pub fn from_config(config: &LocalFileConfig) -> Result<Self, SinkError> {
        config.validate()?;
        log::info!(
            "LocalFileSink writing below {}",
            config.root_dir.display()
        );
        Ok(Self::new(LocalStorage::new(&config.root_dir)))
    }
}

#[async_trait]
impl Sink for LocalFileSink {
    fn name(&self) -> &str {
        "LocalFileSink"
    }

    async fn process(&self, item: ItemRef, ctx: &CrawlContext) -> Result<SinkOutcome, SinkError> {
        let Some(storable) = item.storable() else {
            return Ok(SinkOutcome::Forward(item));
        };

        let key = storable.filepath(ctx);
        let payload = storable.payload();
        let path = self.storage.write_bytes(&key, payload.as_bytes()).await?;
        log::debug!(
            "Stored {} ({} bytes) at {}",
            item.id(),
            payload.len(),
            path.display()
        );

        Ok(SinkOutcome::Forward(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use tempfile::TempDir;

    use crate::models::{BinaryItem, Item, Storable, TextItem};

    #[derive(Debug)]
    struct Marker;

    impl Item for Marker {
        fn kind(&self) -> &str {
            "marker"
        }
        fn id(&self) -> &str {
            "marker-1"
        }
    }

    fn ctx() -> CrawlContext {
        CrawlContext::with_date("books", NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    }

    #[tokio::test]
    async fn test_text_round_trip() {
        let tmp = TempDir::new().unwrap();
        let sink = LocalFileSink::new(LocalStorage::new(tmp.path()));
        let item = TextItem::new("https://example.com/a", "héllo wörld");
        let key = item.filepath(&ctx());

        let outcome = sink.process(Arc::new(item), &ctx()).await.unwrap();
        assert!(matches!(outcome, SinkOutcome::Forward(_)));

        let written = std::fs::read_to_string(tmp.path().join(key)).unwrap();
        assert_eq!(written, "héllo wörld");
    }

    #[tokio::test]
    async fn test_binary_round_trip() {
        let tmp = TempDir::new().unwrap();
        let sink = LocalFileSink::new(LocalStorage::new(tmp.path()));
        let bytes = vec![0u8, 159, 146, 150, 255];
        let item = BinaryItem::new("https://example.com/f.torrent", bytes.clone())
            .with_extension("torrent");
        let key = item.filepath(&ctx());

        sink.process(Arc::new(item), &ctx()).await.unwrap();

        assert_eq!(std::fs::read(tmp.path().join(key)).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_foreign_item_passes_through() {
        let tmp = TempDir::new().unwrap();
        let sink = LocalFileSink::new(LocalStorage::new(tmp.path()));
        let item: ItemRef = Arc::new(Marker);

        let outcome = sink.process(Arc::clone(&item), &ctx()).await.unwrap();
        match outcome {
            SinkOutcome::Forward(forwarded) => assert!(Arc::ptr_eq(&forwarded, &item)),
            SinkOutcome::Drop => panic!("foreign item must not be dropped"),
        }
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("not-a-dir");
        std::fs::write(&root, b"file").unwrap();
        let sink = LocalFileSink::new(LocalStorage::new(&root));

        let err = sink
            .process(Arc::new(TextItem::new("https://example.com/a", "x")), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
    }
}
