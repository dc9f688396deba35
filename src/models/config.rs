//! Pipeline configuration structures.
//!
//! Everything is resolved once, before the first item is processed. There is
//! no hot reload.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result, SinkError};
use crate::models::CrawlContext;

/// Environment variable holding the object storage access key.
pub const ENV_S3_ACCESS_KEY: &str = "CRAWL_SINK_S3_ACCESS_KEY";
/// Environment variable holding the object storage secret key.
pub const ENV_S3_SECRET_KEY: &str = "CRAWL_SINK_S3_SECRET_KEY";
/// Environment variable holding the queue password.
pub const ENV_QUEUE_PASSWORD: &str = "CRAWL_SINK_QUEUE_PASSWORD";
/// Environment variable holding the MNS access key secret.
pub const ENV_MNS_ACCESS_KEY_SECRET: &str = "CRAWL_SINK_MNS_ACCESS_KEY_SECRET";
/// Environment variable holding the dedupe index URL (may embed credentials).
pub const ENV_DEDUPE_URL: &str = "CRAWL_SINK_DEDUPE_URL";

/// Upper bound for `queue.retries`.
pub const MAX_QUEUE_RETRIES: u32 = 100;
/// Upper bound for `queue.retry_backoff_ms`.
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Root pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Crawl context settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Sink ordering
    #[serde(default)]
    pub pipeline: ChainConfig,

    /// Local file sink
    #[serde(default)]
    pub local: LocalFileConfig,

    /// S3-compatible object storage sink
    #[serde(default)]
    pub object_storage: ObjectStorageConfig,

    /// Message queue sink
    #[serde(default)]
    pub queue: QueueConfig,

    /// Dedupe filter sink
    #[serde(default)]
    pub dedupe: DedupeConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Fill secrets from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env_overrides(|key| std::env::var(key).ok());
    }

    /// Fill secrets from an arbitrary lookup. Non-empty values win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get(ENV_S3_ACCESS_KEY) {
            self.object_storage.access_key = Some(value);
        }
        if let Some(value) = get(ENV_S3_SECRET_KEY) {
            self.object_storage.secret_key = Some(value);
        }
        if let Some(value) = get(ENV_QUEUE_PASSWORD) {
            self.queue.password = Some(value);
        }
        if let Some(value) = get(ENV_MNS_ACCESS_KEY_SECRET) {
            self.queue.mns.access_key_secret = Some(value);
        }
        if let Some(value) = get(ENV_DEDUPE_URL) {
            self.dedupe.url = value;
        }
    }

    /// Crawl context for this run.
    pub fn crawl_context(&self) -> CrawlContext {
        CrawlContext::new(&self.context.spider)
    }

    /// Sinks to build, in declared order, skipping disabled ones.
    pub fn enabled_sinks(&self) -> Vec<SinkKind> {
        self.pipeline
            .order
            .iter()
            .copied()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    pub fn is_enabled(&self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::Local => self.local.enabled,
            SinkKind::ObjectStorage => self.object_storage.enabled,
            SinkKind::Queue => self.queue.enabled,
            SinkKind::Dedupe => self.dedupe.enabled,
        }
    }

    /// Validate the whole configuration. Called before any item is processed.
    pub fn validate(&self) -> Result<()> {
        validate_spider(&self.context.spider)
            .map_err(|e| AppError::config(format!("context.spider: {e}")))?;

        let mut seen = HashSet::new();
        for kind in &self.pipeline.order {
            if !seen.insert(*kind) {
                return Err(AppError::config(format!(
                    "pipeline.order lists '{}' more than once",
                    kind.as_str()
                )));
            }
        }

        for kind in SinkKind::ALL {
            if !self.is_enabled(kind) {
                continue;
            }
            if !seen.contains(&kind) {
                return Err(AppError::config(format!(
                    "sink '{}' is enabled but missing from pipeline.order",
                    kind.as_str()
                )));
            }
            match kind {
                SinkKind::Local => self.local.validate()?,
                SinkKind::ObjectStorage => self.object_storage.validate()?,
                SinkKind::Queue => self.queue.validate()?,
                SinkKind::Dedupe => self.dedupe.validate()?,
            }
        }
        Ok(())
    }
}

/// Check a spider name. It becomes the first segment of every storage key,
/// so it must be a single path segment.
pub fn validate_spider(spider: &str) -> std::result::Result<(), String> {
    if spider.trim().is_empty() {
        return Err("spider name is empty".into());
    }
    if spider == "." || spider.contains("..") || spider.contains(['/', '\\']) {
        return Err(format!("spider name '{spider}' must be a single path segment"));
    }
    Ok(())
}

/// The four sink kinds, as named in `pipeline.order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Local,
    ObjectStorage,
    Queue,
    Dedupe,
}

impl SinkKind {
    pub const ALL: [SinkKind; 4] = [
        SinkKind::Dedupe,
        SinkKind::Local,
        SinkKind::ObjectStorage,
        SinkKind::Queue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Local => "local",
            SinkKind::ObjectStorage => "object_storage",
            SinkKind::Queue => "queue",
            SinkKind::Dedupe => "dedupe",
        }
    }
}

/// Crawl context settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Spider name, first segment of every storage key
    #[serde(default = "defaults::spider")]
    pub spider: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            spider: defaults::spider(),
        }
    }
}

/// Sink ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Order in which enabled sinks see each item
    #[serde(default = "defaults::order")]
    pub order: Vec<SinkKind>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            order: defaults::order(),
        }
    }
}

/// Local file sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalFileConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory that item file paths are resolved against
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,
}

impl LocalFileConfig {
    pub fn validate(&self) -> std::result::Result<(), SinkError> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(SinkError::config("local.root_dir is empty"));
        }
        Ok(())
    }
}

impl Default for LocalFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root_dir: defaults::root_dir(),
        }
    }
}

/// S3-compatible object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Endpoint host, with or without scheme (e.g. `minio.local:9000`)
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "defaults::region")]
    pub region: String,

    /// Static access key. Falls back to the AWS default chain when both
    /// keys are absent.
    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    /// Target bucket
    #[serde(default)]
    pub bucket: String,

    /// Optional key prefix, joined with `/`
    #[serde(default)]
    pub prefix: String,

    /// Use https when the endpoint has no scheme
    #[serde(default = "defaults::enabled")]
    pub secure: bool,

    /// Path-style addressing (required by most self-hosted stores)
    #[serde(default = "defaults::enabled")]
    pub force_path_style: bool,

    #[serde(default = "defaults::connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl ObjectStorageConfig {
    pub fn validate(&self) -> std::result::Result<(), SinkError> {
        if self.endpoint.trim().is_empty() {
            return Err(SinkError::config("object_storage.endpoint is empty"));
        }
        if self.bucket.trim().is_empty() {
            return Err(SinkError::config("object_storage.bucket is empty"));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(SinkError::config(
                "object_storage.access_key and secret_key must be set together",
            ));
        }
        check_timeouts("object_storage", self.connect_timeout_secs, self.timeout_secs)
    }

    /// Endpoint as a URL, adding a scheme when missing.
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else if self.secure {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        }
    }

    /// Object key for an item file path.
    pub fn object_key(&self, filepath: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            filepath.to_string()
        } else {
            format!("{}/{}", prefix, filepath.trim_start_matches('/'))
        }
    }
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            region: defaults::region(),
            access_key: None,
            secret_key: None,
            bucket: String::new(),
            prefix: String::new(),
            secure: true,
            force_path_style: true,
            connect_timeout_secs: defaults::connect_timeout(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Queue technology behind the message queue sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Kafka, reached through a REST proxy
    #[default]
    Kafka,
    /// Aliyun Message Service queue
    Mns,
}

impl QueueBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueBackend::Kafka => "kafka",
            QueueBackend::Mns => "mns",
        }
    }
}

/// Message queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub backend: QueueBackend,

    /// Kafka REST proxy endpoints; attempts rotate through them
    #[serde(default)]
    pub servers: Vec<String>,

    /// Destination topic (the queue name with the MNS backend)
    #[serde(default)]
    pub topic: String,

    /// MNS account settings, used with `backend = "mns"`
    #[serde(default)]
    pub mns: MnsConfig,

    /// Publish attempts after the first one fails
    #[serde(default = "defaults::retries")]
    pub retries: u32,

    /// Delay step between attempts, multiplied by the attempt number
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Encrypted and authenticated transport
    #[serde(default)]
    pub ssl_enable: bool,

    /// CA bundle (PEM) used to verify the brokers in ssl mode
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    #[serde(default = "defaults::sasl_mechanism")]
    pub sasl_mechanism: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "defaults::connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl QueueConfig {
    pub fn validate(&self) -> std::result::Result<(), SinkError> {
        if self.topic.trim().is_empty() {
            return Err(SinkError::config("queue.topic is empty"));
        }
        if self.retries > MAX_QUEUE_RETRIES {
            return Err(SinkError::config(format!(
                "queue.retries must be <= {MAX_QUEUE_RETRIES}"
            )));
        }
        if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(SinkError::config(format!(
                "queue.retry_backoff_ms must be <= {MAX_RETRY_BACKOFF_MS}"
            )));
        }
        match self.backend {
            QueueBackend::Kafka => self.validate_kafka()?,
            QueueBackend::Mns => self.mns.validate()?,
        }
        check_timeouts("queue", self.connect_timeout_secs, self.timeout_secs)
    }

    fn validate_kafka(&self) -> std::result::Result<(), SinkError> {
        if self.servers.iter().all(|s| s.trim().is_empty()) {
            return Err(SinkError::config("queue.servers is empty"));
        }
        if self.ssl_enable {
            if self.ca_cert_path.is_none() {
                return Err(SinkError::config("queue.ca_cert_path is required with ssl_enable"));
            }
            if self.username.is_none() || self.password.is_none() {
                return Err(SinkError::config(
                    "queue.username and queue.password are required with ssl_enable",
                ));
            }
            if !self.sasl_mechanism.eq_ignore_ascii_case("PLAIN") {
                return Err(SinkError::config(format!(
                    "unsupported queue.sasl_mechanism '{}'",
                    self.sasl_mechanism
                )));
            }
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: QueueBackend::default(),
            servers: Vec::new(),
            topic: String::new(),
            mns: MnsConfig::default(),
            retries: defaults::retries(),
            retry_backoff_ms: defaults::retry_backoff(),
            ssl_enable: false,
            ca_cert_path: None,
            sasl_mechanism: defaults::sasl_mechanism(),
            username: None,
            password: None,
            connect_timeout_secs: defaults::connect_timeout(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Aliyun MNS account settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnsConfig {
    /// Account endpoint, e.g. `https://1234.mns.cn-hangzhou.aliyuncs.com`
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub access_key_id: String,

    #[serde(default)]
    pub access_key_secret: Option<String>,
}

impl MnsConfig {
    pub fn validate(&self) -> std::result::Result<(), SinkError> {
        if self.endpoint.trim().is_empty() {
            return Err(SinkError::config("queue.mns.endpoint is empty"));
        }
        url::Url::parse(self.endpoint.trim())
            .map_err(|e| SinkError::config(format!("queue.mns.endpoint is invalid: {e}")))?;
        if self.access_key_id.trim().is_empty() {
            return Err(SinkError::config("queue.mns.access_key_id is empty"));
        }
        if self.access_key_secret.as_deref().is_none_or(|s| s.is_empty()) {
            return Err(SinkError::config("queue.mns.access_key_secret is empty"));
        }
        Ok(())
    }
}

/// Dedupe filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Index base URL; `user:pass@` in the URL becomes basic auth
    #[serde(default)]
    pub url: String,

    /// Index (collection) holding already-seen keys
    #[serde(default)]
    pub index: String,

    #[serde(default = "defaults::doc_type")]
    pub doc_type: String,

    /// Only items of this kind are checked; everything else passes through
    #[serde(default = "defaults::target_kind")]
    pub target_kind: String,

    #[serde(default = "defaults::connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl DedupeConfig {
    pub fn validate(&self) -> std::result::Result<(), SinkError> {
        if self.url.trim().is_empty() {
            return Err(SinkError::config("dedupe.url is empty"));
        }
        url::Url::parse(&self.url)
            .map_err(|e| SinkError::config(format!("dedupe.url is invalid: {e}")))?;
        if self.index.trim().is_empty() {
            return Err(SinkError::config("dedupe.index is empty"));
        }
        if self.target_kind.trim().is_empty() {
            return Err(SinkError::config("dedupe.target_kind is empty"));
        }
        check_timeouts("dedupe", self.connect_timeout_secs, self.timeout_secs)
    }
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            index: String::new(),
            doc_type: defaults::doc_type(),
            target_kind: defaults::target_kind(),
            connect_timeout_secs: defaults::connect_timeout(),
            timeout_secs: defaults::timeout(),
        }
    }
}

fn check_timeouts(
    section: &str,
    connect_timeout_secs: u64,
    timeout_secs: u64,
) -> std::result::Result<(), SinkError> {
    if connect_timeout_secs == 0 {
        return Err(SinkError::config(format!(
            "{section}.connect_timeout_secs must be > 0"
        )));
    }
    if timeout_secs == 0 {
        return Err(SinkError::config(format!("{section}.timeout_secs must be > 0")));
    }
    Ok(())
}

/// Default value functions for serde.
mod defaults {
    use std::path::PathBuf;

    use super::SinkKind;
    use crate::models::DEDUPABLE_BINARY_KIND;

    pub fn spider() -> String {
        "default".into()
    }
    pub fn order() -> Vec<SinkKind> {
        SinkKind::ALL.to_vec()
    }
    pub fn root_dir() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn region() -> String {
        "us-east-1".into()
    }
    pub fn enabled() -> bool {
        true
    }
    pub fn connect_timeout() -> u64 {
        3
    }
    pub fn timeout() -> u64 {
        5
    }
    pub fn retries() -> u32 {
        5
    }
    pub fn retry_backoff() -> u64 {
        100
    }
    pub fn sasl_mechanism() -> String {
        "PLAIN".into()
    }
    pub fn doc_type() -> String {
        "_doc".into()
    }
    pub fn target_kind() -> String {
        DEDUPABLE_BINARY_KIND.into()
    }
}
