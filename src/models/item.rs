//! Harvested items and the capabilities sinks query them for.
//!
//! A sink never inspects the concrete item type. It asks the item for a
//! capability view (`storable`, `queueable`, `dedupable`) and treats a `None`
//! as "not applicable", passing the item through untouched. Every view
//! defaults to `None`, so a new item type only reaches a sink after it opts in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::models::{CrawlContext, QueueBackend};
use crate::utils::sha256_hex;

/// Kind name of [`TextItem`].
pub const TEXT_KIND: &str = "text";
/// Kind name of [`BinaryItem`].
pub const BINARY_KIND: &str = "binary";
/// Kind name of [`DedupableBinaryItem`].
pub const DEDUPABLE_BINARY_KIND: &str = "dedupable_binary";

/// Shared handle to an item as it moves through the chain.
pub type ItemRef = Arc<dyn Item>;

/// Serialized body of a storable item. An item has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> Payload<'a> {
    /// Text body, if the item is stored as text.
    pub fn text(&self) -> Option<&'a str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Bytes(_) => None,
        }
    }

    /// Raw bytes regardless of representation.
    pub fn as_bytes(&self) -> &'a [u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text/plain; charset=utf-8",
            Payload::Bytes(_) => "application/octet-stream",
        }
    }
}

/// A record produced by the crawler.
pub trait Item: fmt::Debug + Send + Sync {
    /// Variant name, e.g. `"text"`.
    fn kind(&self) -> &str;

    /// Identifier used in logs and failure reports.
    fn id(&self) -> &str;

    fn storable(&self) -> Option<&dyn Storable> {
        None
    }

    fn queueable(&self) -> Option<&dyn Queueable> {
        None
    }

    fn dedupable(&self) -> Option<&dyn Dedupable> {
        None
    }
}

/// Items that can be written to a file or an object store.
pub trait Storable: Sync {
    /// Relative storage key. Deterministic for a given item and context.
    fn filepath(&self, ctx: &CrawlContext) -> String;

    fn payload(&self) -> Payload<'_>;

    /// Attributes attached to the stored blob.
    fn metadata(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Items that can be announced on a message queue.
pub trait Queueable: Sync {
    /// Message announcing the item on `backend`.
    fn queue_message(&self, ctx: &CrawlContext, backend: QueueBackend) -> Value;
}

/// Items carrying a stable content-derived identifier.
pub trait Dedupable: Sync {
    fn dedupe_key(&self) -> &str;
}

/// Storage key shared by the built-in item types.
fn storage_key(ctx: &CrawlContext, url: &str, extension: &str) -> String {
    format!(
        "{}/{}/{}.{}",
        ctx.spider,
        ctx.date_path(),
        sha256_hex(url.as_bytes()),
        extension.trim_start_matches('.')
    )
}

fn base_metadata(kind: &str, url: &str, extra: &HashMap<String, String>) -> HashMap<String, String> {
    let mut meta = extra.clone();
    meta.insert("url".to_string(), url.to_string());
    meta.insert("kind".to_string(), kind.to_string());
    meta
}

/// Pointer to the stored payload. MNS bodies are capped at 64 KiB, so the
/// MNS form leaves out the free-form metadata.
fn pointer_message(
    kind: &str,
    url: &str,
    storable: &dyn Storable,
    ctx: &CrawlContext,
    backend: QueueBackend,
) -> Value {
    let mut message = json!({
        "spider": ctx.spider,
        "kind": kind,
        "url": url,
        "filepath": storable.filepath(ctx),
        "size": storable.payload().len(),
    });
    if backend == QueueBackend::Kafka {
        message["metadata"] = json!(storable.metadata());
    }
    message
}

// --- TextItem ---

/// A page or document stored as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextItem {
    pub url: String,
    pub text: String,
    pub extension: String,
    pub metadata: HashMap<String, String>,
}

impl TextItem {
    pub fn new(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: text.into(),
            extension: "txt".to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Item for TextItem {
    fn kind(&self) -> &str {
        TEXT_KIND
    }

    fn id(&self) -> &str {
        &self.url
    }

    fn storable(&self) -> Option<&dyn Storable> {
        Some(self)
    }

    fn queueable(&self) -> Option<&dyn Queueable> {
        Some(self)
    }
}

impl Storable for TextItem {
    fn filepath(&self, ctx: &CrawlContext) -> String {
        storage_key(ctx, &self.url, &self.extension)
    }

    fn payload(&self) -> Payload<'_> {
        Payload::Text(&self.text)
    }

    fn metadata(&self) -> HashMap<String, String> {
        base_metadata(TEXT_KIND, &self.url, &self.metadata)
    }
}

impl Queueable for TextItem {
    fn queue_message(&self, ctx: &CrawlContext, backend: QueueBackend) -> Value {
        pointer_message(TEXT_KIND, &self.url, self, ctx, backend)
    }
}

// --- BinaryItem ---

/// A fetched file payload stored as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryItem {
    pub url: String,
    pub bytes: Vec<u8>,
    pub extension: String,
    pub metadata: HashMap<String, String>,
}

impl BinaryItem {
    pub fn new(url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            bytes: bytes.into(),
            extension: "bin".to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach a dedupe key derived from the content hash.
    pub fn into_dedupable(self) -> DedupableBinaryItem {
        let key = sha256_hex(&self.bytes);
        DedupableBinaryItem {
            inner: self,
            dedupe_key: key,
        }
    }

    /// Attach a dedupe key supplied by the crawler (e.g. a torrent info hash).
    pub fn with_dedupe_key(self, key: impl Into<String>) -> DedupableBinaryItem {
        DedupableBinaryItem {
            inner: self,
            dedupe_key: key.into(),
        }
    }
}

impl Item for BinaryItem {
    fn kind(&self) -> &str {
        BINARY_KIND
    }

    fn id(&self) -> &str {
        &self.url
    }

    fn storable(&self) -> Option<&dyn Storable> {
        Some(self)
    }

    fn queueable(&self) -> Option<&dyn Queueable> {
        Some(self)
    }
}

impl Storable for BinaryItem {
    fn filepath(&self, ctx: &CrawlContext) -> String {
        storage_key(ctx, &self.url, &self.extension)
    }

    fn payload(&self) -> Payload<'_> {
        Payload::Bytes(&self.bytes)
    }

    fn metadata(&self) -> HashMap<String, String> {
        base_metadata(BINARY_KIND, &self.url, &self.metadata)
    }
}

impl Queueable for BinaryItem {
    fn queue_message(&self, ctx: &CrawlContext, backend: QueueBackend) -> Value {
        pointer_message(BINARY_KIND, &self.url, self, ctx, backend)
    }
}

// --- DedupableBinaryItem ---

/// A binary item that participates in deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupableBinaryItem {
    pub inner: BinaryItem,
    pub dedupe_key: String,
}

impl Item for DedupableBinaryItem {
    fn kind(&self) -> &str {
        DEDUPABLE_BINARY_KIND
    }

    fn id(&self) -> &str {
        &self.inner.url
    }

    fn storable(&self) -> Option<&dyn Storable> {
        Some(self)
    }

    fn queueable(&self) -> Option<&dyn Queueable> {
        Some(self)
    }

    fn dedupable(&self) -> Option<&dyn Dedupable> {
        Some(self)
    }
}

impl Storable for DedupableBinaryItem {
    fn filepath(&self, ctx: &CrawlContext) -> String {
        self.inner.filepath(ctx)
    }

    fn payload(&self) -> Payload<'_> {
        self.inner.payload()
    }

    fn metadata(&self) -> HashMap<String, String> {
        let mut meta = base_metadata(DEDUPABLE_BINARY_KIND, &self.inner.url, &self.inner.metadata);
        meta.insert("dedupe_key".to_string(), self.dedupe_key.clone());
        meta
    }
}

impl Queueable for DedupableBinaryItem {
    fn queue_message(&self, ctx: &CrawlContext, backend: QueueBackend) -> Value {
        let mut message =
            pointer_message(DEDUPABLE_BINARY_KIND, &self.inner.url, self, ctx, backend);
        message["dedupe_key"] = Value::String(self.dedupe_key.clone());
        message
    }
}

impl Dedupable for DedupableBinaryItem {
    fn dedupe_key(&self) -> &str {
        &self.dedupe_key
    }
}

// --- JSON records ---

/// Why a record could not become an item.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid hex body: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid extension '{0}': must be a single path segment")]
    Extension(String),
}

/// The extension ends up in a storage key, so it may not add path segments.
fn check_extension(extension: String) -> Result<String, RecordError> {
    let trimmed = extension.trim_start_matches('.');
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed.contains("..") {
        return Err(RecordError::Extension(extension));
    }
    Ok(extension)
}

fn default_text_extension() -> String {
    "txt".to_string()
}

fn default_binary_extension() -> String {
    "bin".to_string()
}

/// One line of a JSON-lines item file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemRecord {
    Text {
        url: String,
        text: String,
        #[serde(default = "default_text_extension")]
        extension: String,
        #[serde(default)]
        metadata: HashMap<String, String>,
    },
    Binary {
        url: String,
        hex: String,
        #[serde(default = "default_binary_extension")]
        extension: String,
        #[serde(default)]
        metadata: HashMap<String, String>,
    },
    DedupableBinary {
        url: String,
        hex: String,
        #[serde(default = "default_binary_extension")]
        extension: String,
        #[serde(default)]
        metadata: HashMap<String, String>,
        /// Falls back to the SHA-256 of the body when absent
        #[serde(default)]
        dedupe_key: Option<String>,
    },
}

impl ItemRecord {
    /// Convert the record into a shareable item.
    pub fn into_item(self) -> Result<ItemRef, RecordError> {
        let item: ItemRef = match self {
            ItemRecord::Text {
                url,
                text,
                extension,
                metadata,
            } => Arc::new(TextItem {
                url,
                text,
                extension: check_extension(extension)?,
                metadata,
            }),
            ItemRecord::Binary {
                url,
                hex,
                extension,
                metadata,
            } => Arc::new(BinaryItem {
                url,
                bytes: hex::decode(hex)?,
                extension: check_extension(extension)?,
                metadata,
            }),
            ItemRecord::DedupableBinary {
                url,
                hex,
                extension,
                metadata,
                dedupe_key,
            } => {
                let binary = BinaryItem {
                    url,
                    bytes: hex::decode(hex)?,
                    extension: check_extension(extension)?,
                    metadata,
                };
                Arc::new(match dedupe_key {
                    Some(key) => binary.with_dedupe_key(key),
                    None => binary.into_dedupable(),
                })
            }
        };
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ctx() -> CrawlContext {
        CrawlContext::with_date("books", NaiveDate::from_ymd_opt(2024, 11, 2).unwrap())
    }

    #[test]
    fn test_text_item_capabilities() {
        let item = TextItem::new("https://example.com/a", "hello");
        assert!(item.storable().is_some());
        assert!(item.queueable().is_some());
        assert!(item.dedupable().is_none());

        let payload = item.storable().unwrap().payload();
        assert_eq!(payload.text(), Some("hello"));
    }

    #[test]
    fn test_binary_item_has_no_text() {
        let item = BinaryItem::new("https://example.com/f", vec![0u8, 1, 2]);
        let payload = item.payload();
        assert_eq!(payload.text(), None);
        assert_eq!(payload.as_bytes(), &[0u8, 1, 2]);
        assert!(item.dedupable().is_none());
    }

    #[test]
    fn test_filepath_is_deterministic_and_url_keyed() {
        let a = TextItem::new("https://example.com/a", "one");
        let a_again = TextItem::new("https://example.com/a", "two");
        let b = TextItem::new("https://example.com/b", "one");

        let path = a.filepath(&ctx());
        assert_eq!(path, a_again.filepath(&ctx()));
        assert_ne!(path, b.filepath(&ctx()));
        assert!(path.starts_with("books/2024/11/02/"));
        assert!(path.ends_with(".txt"));
    }

    #[test]
    fn test_dedupe_key_defaults_to_content_hash() {
        let item = BinaryItem::new("https://example.com/t.torrent", b"payload".to_vec()).into_dedupable();
        assert_eq!(item.dedupe_key(), sha256_hex(b"payload"));
        assert_eq!(item.kind(), DEDUPABLE_BINARY_KIND);

        let explicit = BinaryItem::new("https://example.com/t.torrent", b"payload".to_vec())
            .with_dedupe_key("abc123");
        assert_eq!(explicit.dedupe_key(), "abc123");
        assert_eq!(explicit.metadata().get("dedupe_key").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_queue_message_points_at_storage_key() {
        let item = TextItem::new("https://example.com/a", "hello").with_metadata("lang", "en");
        let message = item.queue_message(&ctx(), QueueBackend::Kafka);

        assert_eq!(message["spider"], "books");
        assert_eq!(message["kind"], TEXT_KIND);
        assert_eq!(message["filepath"], item.filepath(&ctx()));
        assert_eq!(message["size"], 5);
        assert_eq!(message["metadata"]["lang"], "en");
    }

    #[test]
    fn test_mns_message_leaves_out_metadata() {
        let item = BinaryItem::new("https://example.com/t", b"abc".to_vec())
            .with_metadata("lang", "en")
            .with_dedupe_key("h1");
        let message = item.queue_message(&ctx(), QueueBackend::Mns);

        assert_eq!(message["filepath"], item.filepath(&ctx()));
        assert_eq!(message["dedupe_key"], "h1");
        assert!(message.get("metadata").is_none());
    }

    #[test]
    fn test_record_parsing() {
        let text: ItemRecord =
            serde_json::from_str(r#"{"kind":"text","url":"https://e.com/1","text":"hi"}"#).unwrap();
        let item = text.into_item().unwrap();
        assert_eq!(item.kind(), TEXT_KIND);
        assert_eq!(item.id(), "https://e.com/1");

        let binary: ItemRecord = serde_json::from_str(
            r#"{"kind":"dedupable_binary","url":"https://e.com/2","hex":"00ff","dedupe_key":"h1"}"#,
        )
        .unwrap();
        let item = binary.into_item().unwrap();
        assert_eq!(item.dedupable().unwrap().dedupe_key(), "h1");
        assert_eq!(item.storable().unwrap().payload().as_bytes(), &[0x00, 0xff]);
    }

    #[test]
    fn test_record_rejects_bad_hex() {
        let record: ItemRecord =
            serde_json::from_str(r#"{"kind":"binary","url":"https://e.com/3","hex":"zz"}"#).unwrap();
        assert!(matches!(record.into_item(), Err(RecordError::Hex(_))));
    }

    #[test]
    fn test_record_rejects_extension_with_path_segments() {
        for extension in ["x/../../escaped.txt", "..", "a\\b", "/"] {
            let line = json!({"kind": "text", "url": "https://e.com/4", "text": "x", "extension": extension});
            let record: ItemRecord = serde_json::from_value(line).unwrap();
            assert!(
                matches!(record.into_item(), Err(RecordError::Extension(_))),
                "{extension} must be rejected"
            );
        }

        let record: ItemRecord = serde_json::from_str(
            r#"{"kind":"binary","url":"https://e.com/5","hex":"00","extension":".torrent"}"#,
        )
        .unwrap();
        assert!(record.into_item().is_ok());
    }
}
