//! Document retrieval over JSON/HTTP.
//!
//! `GET {base_url}/documents/{candidate_id}` returns a `DocumentBundle`. The
//! id is sent as one percent-encoded path segment.
//! A 404 means the registry has no filings for the mark and maps to an empty
//! bundle; anything else non-2xx is an error for the pipeline to record.

use std::time::Duration;

use async_trait::async_trait;
use marksim_core::{CollabResult, DocumentBundle, DocumentSource};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{classify, parse_segment_base, status_error, Result};

/// Document service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentServiceConfig {
    /// Service base URL, without the `/documents` suffix
    pub base_url: String,
    /// Optional bearer token
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for DocumentServiceConfig {
    fn default() -> Self {
        DocumentServiceConfig {
            base_url: std::env::var("MARKSIM_DOCS_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8081".to_string()),
            token: std::env::var("MARKSIM_DOCS_TOKEN").ok(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl DocumentServiceConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(base_url: &str) -> Self {
        DocumentServiceConfig {
            base_url: base_url.to_string(),
            token: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct HttpDocumentSource {
    base_url: reqwest::Url,
    token: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpDocumentSource {
    pub fn new(config: DocumentServiceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("marksim-adapters/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(HttpDocumentSource {
            base_url: parse_segment_base(&config.base_url)?,
            token: config.token,
            timeout: config.timeout,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(DocumentServiceConfig::from_env())
    }

    fn document_url(&self, candidate_id: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        // checked at construction: the base always accepts segments
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("documents").push(candidate_id);
        }
        url
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch(&self, candidate_id: &str) -> CollabResult<DocumentBundle> {
        let url = self.document_url(candidate_id);
        let timeout_ms = self.timeout.as_millis() as u64;

        let mut request = self.http_client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| classify(e, timeout_ms))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(candidate_id = %candidate_id, "no filings on record");
            return Ok(DocumentBundle::empty());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        response
            .json::<DocumentBundle>()
            .await
            .map_err(|e| classify(e, timeout_ms))
    }
}
