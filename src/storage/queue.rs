//! Message queue producer speaking the Kafka REST proxy protocol.
//!
//! `POST {server}/topics/{topic}` with a `records` envelope; the proxy
//! answers with one offset per record once the broker has acknowledged the
//! write. Retries run inside a single `publish` call, rotating through the
//! configured servers, so a caller never proceeds before an ack or a final
//! failure.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::SinkError;
use crate::models::QueueConfig;
use crate::storage::MessageQueue;
use crate::utils::http::{HttpSettings, create_async_client};

const CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";
const ACCEPT: &str = "application/vnd.kafka.v2+json";

/// Broker response to a produce request.
#[derive(Debug, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    offsets: Vec<RecordOffset>,
}

#[derive(Debug, Deserialize)]
struct RecordOffset {
    #[serde(default)]
    partition: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// Outcome of a single publish attempt.
pub(crate) enum Attempt {
    Acked,
    Retry(String),
    Fatal(String),
}

/// Bounded retries with a linear backoff, shared by the queue producers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    pub(crate) fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.retries, Duration::from_millis(config.retry_backoff_ms))
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Pause after the failed attempt `attempt` (0-based).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt.saturating_add(1))
    }

    /// Run `send` until it acks, fails fatally, or the budget is spent.
    pub(crate) async fn run<F, Fut>(
        &self,
        backend: &str,
        topic: &str,
        mut send: F,
    ) -> Result<(), SinkError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt>,
    {
        let attempts = self.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match send(attempt).await {
                Attempt::Acked => return Ok(()),
                Attempt::Fatal(message) => return Err(SinkError::backend(backend, message)),
                Attempt::Retry(message) => {
                    log::warn!(
                        "Publish attempt {}/{} to {} failed: {}",
                        attempt + 1,
                        attempts,
                        topic,
                        message
                    );
                    last_error = message;
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.delay(attempt)).await;
                    }
                }
            }
        }

        Err(SinkError::backend(
            backend,
            format!("no acknowledgment for {topic} after {attempts} attempt(s): {last_error}"),
        ))
    }
}

/// HTTP producer with a bounded retry budget.
pub struct RestProducer {
    client: reqwest::Client,
    servers: Vec<String>,
    retry: RetryPolicy,
    credentials: Option<(String, String)>,
}

impl RestProducer {
    /// Build a producer from configuration.
    ///
    /// In ssl mode every server must use https, the configured CA bundle is
    /// trusted, and requests carry the SASL PLAIN credentials as basic auth.
    pub async fn connect(config: &QueueConfig) -> Result<Self, SinkError> {
        let servers = normalize_servers(&config.servers, config.ssl_enable)?;

        let mut settings = HttpSettings::from_secs(config.connect_timeout_secs, config.timeout_secs);
        let mut credentials = None;
        if config.ssl_enable {
            settings = settings.with_ca_cert(config.ca_cert_path.clone());
            match (&config.username, &config.password) {
                (Some(user), Some(pass)) => credentials = Some((user.clone(), pass.clone())),
                _ => return Err(SinkError::config("queue credentials are required in ssl mode")),
            }
        }

        let client = create_async_client(&settings).await?;
        log::info!(
            "Queue producer ready: {} server(s), ssl={}, retries={}",
            servers.len(),
            config.ssl_enable,
            config.retries
        );

        Ok(Self {
            client,
            servers,
            retry: RetryPolicy::from_config(config),
            credentials,
        })
    }

    async fn send_once(&self, server: &str, topic: &str, body: &Value) -> Attempt {
        let url = format!("{}/topics/{}", server, topic);
        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .json(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(format!("{url}: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("{url}: HTTP {status} {}", text.trim());
            return if status.is_server_error()
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::REQUEST_TIMEOUT
            {
                Attempt::Retry(message)
            } else {
                Attempt::Fatal(message)
            };
        }

        let produced: ProduceResponse = match response.json().await {
            Ok(produced) => produced,
            Err(e) => return Attempt::Retry(format!("{url}: unreadable acknowledgment: {e}")),
        };

        match produced.offsets.first() {
            None => Attempt::Retry(format!("{url}: acknowledgment without offsets")),
            Some(RecordOffset {
                error: Some(error), ..
            }) => Attempt::Retry(format!("{url}: broker rejected record: {error}")),
            Some(ack) => {
                log::debug!(
                    "Published to {} (partition {:?}, offset {:?})",
                    topic,
                    ack.partition,
                    ack.offset
                );
                Attempt::Acked
            }
        }
    }
}

#[async_trait]
impl MessageQueue for RestProducer {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), SinkError> {
        let body = json!({ "records": [{ "value": payload }] });
        let body = &body;
        self.retry
            .run("queue", topic, |attempt| {
                let server = &self.servers[attempt as usize % self.servers.len()];
                self.send_once(server, topic, body)
            })
            .await
    }
}

/// Trim servers, add a scheme where missing, and reject plain http in ssl mode.
fn normalize_servers(servers: &[String], ssl: bool) -> Result<Vec<String>, SinkError> {
    let mut normalized = Vec::new();
    for server in servers.iter().map(|s| s.trim().trim_end_matches('/')) {
        if server.is_empty() {
            continue;
        }
        let server = if server.contains("://") {
            server.to_string()
        } else if ssl {
            format!("https://{server}")
        } else {
            format!("http://{server}")
        };
        if ssl && !server.starts_with("https://") {
            return Err(SinkError::config(format!(
                "queue server {server} must use https in ssl mode"
            )));
        }
        normalized.push(server);
    }

    if normalized.is_empty() {
        return Err(SinkError::config("queue.servers is empty"));
    }
    Ok(normalized)
}
