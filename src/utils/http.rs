// src/utils/http.rs

//! HTTP client utilities shared by the queue producer and the dedupe index.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::SinkError;

/// Transport settings for one backend client.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// Extra PEM root certificate to trust
    pub ca_cert: Option<PathBuf>,
}

impl HttpSettings {
    pub fn from_secs(connect_timeout_secs: u64, timeout_secs: u64) -> Self {
        Self {
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            timeout: Duration::from_secs(timeout_secs),
            ca_cert: None,
        }
    }

    pub fn with_ca_cert(mut self, path: Option<PathBuf>) -> Self {
        self.ca_cert = path;
        self
    }
}

/// Create a configured asynchronous HTTP client.
///
/// Any failure here is a configuration problem (unreadable or invalid CA
/// bundle, TLS backend setup).
pub async fn create_async_client(settings: &HttpSettings) -> Result<reqwest::Client, SinkError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("crawl-sink/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.timeout);

    if let Some(path) = &settings.ca_cert {
        let pem = tokio::fs::read(path).await.map_err(|e| {
            SinkError::config(format!("cannot read CA bundle {}: {e}", path.display()))
        })?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
            SinkError::config(format!("invalid CA bundle {}: {e}", path.display()))
        })?;
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| SinkError::config(format!("cannot build HTTP client: {e}")))
}
