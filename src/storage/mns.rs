//! Message queue producer for Aliyun Message Service (MNS) queues.
//!
//! `POST {endpoint}/queues/{queue}/messages` with an XML `Message` whose body
//! is the base64 of the JSON payload. Requests are signed with HMAC-SHA1 over
//! the MNS string-to-sign; a `201 Created` is the acknowledgment.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;

use crate::error::SinkError;
use crate::models::QueueConfig;
use crate::storage::MessageQueue;
use crate::storage::queue::{Attempt, RetryPolicy};
use crate::utils::http::{HttpSettings, create_async_client};

const MNS_VERSION: &str = "2015-06-06";
const CONTENT_TYPE: &str = "text/xml;charset=utf-8";
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Signed HTTP producer for one MNS account.
pub struct MnsProducer {
    client: reqwest::Client,
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
    retry: RetryPolicy,
}

impl MnsProducer {
    pub async fn connect(config: &QueueConfig) -> Result<Self, SinkError> {
        config.mns.validate()?;
        let access_key_secret = config
            .mns
            .access_key_secret
            .clone()
            .ok_or_else(|| SinkError::config("queue.mns.access_key_secret is empty"))?;

        let settings = HttpSettings::from_secs(config.connect_timeout_secs, config.timeout_secs);
        let client = create_async_client(&settings).await?;
        let endpoint = config.mns.endpoint.trim().trim_end_matches('/').to_string();
        log::info!("MNS producer ready: {} (retries={})", endpoint, config.retries);

        Ok(Self {
            client,
            endpoint,
            access_key_id: config.mns.access_key_id.trim().to_string(),
            access_key_secret,
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn send_once(&self, queue: &str, body: &str) -> Attempt {
        let resource = format!("/queues/{queue}/messages");
        let url = format!("{}{}", self.endpoint, resource);
        let date = chrono::Utc::now().format(DATE_FORMAT).to_string();

        let signature = match sign(&self.access_key_secret, "POST", CONTENT_TYPE, &date, &resource) {
            Ok(signature) => signature,
            Err(e) => return Attempt::Fatal(e.to_string()),
        };

        let request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(reqwest::header::DATE, &date)
            .header("x-mns-version", MNS_VERSION)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("MNS {}:{}", self.access_key_id, signature),
            )
            .body(body.to_string());

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(format!("{url}: {e}")),
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::CREATED {
            log::debug!(
                "Sent message {} to MNS queue {}",
                xml_field(&text, "MessageId").unwrap_or("?"),
                queue
            );
            return Attempt::Acked;
        }

        let code = xml_field(&text, "Code").unwrap_or("unknown");
        let message = format!(
            "{url}: HTTP {status} {code}: {}",
            xml_field(&text, "Message").unwrap_or_default()
        );
        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            Attempt::Retry(message)
        } else {
            Attempt::Fatal(message)
        }
    }
}

#[async_trait]
impl MessageQueue for MnsProducer {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), SinkError> {
        let json = serde_json::to_string(&payload)
            .map_err(|e| SinkError::backend("mns", format!("cannot encode message: {e}")))?;
        let body = message_xml(&json);
        let body = &body;
        self.retry
            .run("mns", topic, |_| self.send_once(topic, body))
            .await
    }
}

/// `SendMessage` request body.
fn message_xml(json: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<Message xmlns="http://mns.aliyuncs.com/doc/v1/">"#,
            "<MessageBody>{}</MessageBody>",
            "<DelaySeconds>0</DelaySeconds>",
            "<Priority>8</Priority>",
            "</Message>"
        ),
        STANDARD.encode(json)
    )
}

/// Signature of a request without a Content-MD5 and with `x-mns-version` as
/// the only MNS header.
fn sign(
    secret: &str,
    method: &str,
    content_type: &str,
    date: &str,
    resource: &str,
) -> Result<String, SinkError> {
    let string_to_sign =
        format!("{method}\n\n{content_type}\n{date}\nx-mns-version:{MNS_VERSION}\n{resource}");
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .map_err(|e| SinkError::config(format!("invalid MNS access key secret: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Text of the first `<name>` element.
fn xml_field<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&format!("</{name}>"))? + start;
    Some(&xml[start..end])
}
