//! Document existence checks against an Elasticsearch-compatible index.

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::error::SinkError;
use crate::models::DedupeConfig;
use crate::storage::DedupeIndex;
use crate::utils::http::{HttpSettings, create_async_client};

/// `HEAD {url}/{index}/{doc_type}/{id}`: 200 means seen, 404 means new.
pub struct ElasticIndex {
    client: reqwest::Client,
    base: Url,
    doc_type: String,
    credentials: Option<(String, Option<String>)>,
}

impl ElasticIndex {
    /// Build an index client. Credentials embedded in the URL become basic auth.
    pub async fn connect(config: &DedupeConfig) -> Result<Self, SinkError> {
        let mut base = Url::parse(&config.url)
            .map_err(|e| SinkError::config(format!("invalid dedupe url: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SinkError::config(format!(
                "dedupe url {} cannot be a base",
                config.url
            )));
        }

        let credentials = if base.username().is_empty() {
            None
        } else {
            Some((
                base.username().to_string(),
                base.password().map(str::to_string),
            ))
        };
        // Credentials travel as basic auth, never in the request URL.
        let _ = base.set_username("");
        let _ = base.set_password(None);

        let settings = HttpSettings::from_secs(config.connect_timeout_secs, config.timeout_secs);
        let client = create_async_client(&settings).await?;
        log::info!("Dedupe index client ready for {}", base);

        Ok(Self {
            client,
            base,
            doc_type: config.doc_type.clone(),
            credentials,
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend([collection, self.doc_type.as_str(), id]);
        }
        url
    }
}

#[async_trait]
impl DedupeIndex for ElasticIndex {
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, SinkError> {
        let url = self.document_url(collection, id);
        let mut request = self.client.head(url.clone());
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, pass.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::backend("dedupe index", format!("{url}: {e}")))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(SinkError::backend(
                "dedupe index",
                format!("{url}: unexpected HTTP {status}"),
            )),
        }
    }
}
