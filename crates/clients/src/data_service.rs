//! Client for the document-ingestion / semantic-query data service.
//!
//! The service receives object-store URLs, parses the documents, and
//! answers semantic queries over what it ingested. The runtime never
//! sees file bytes — only parsed text and query results.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use ms_domain::error::{Error, Result};
use ms_domain::trace::TraceEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub document_id: String,
    pub text: String,
    #[serde(default)]
    pub page_count: u32,
}

#[async_trait::async_trait]
pub trait DataService: Send + Sync {
    /// Parse the document at an object-store URL, waiting up to
    /// `deadline` for the text to be available.
    async fn parse_document(&self, url: &str, deadline: Duration) -> Result<ParsedDocument>;

    /// Semantic query over previously ingested documents.
    async fn semantic_query(
        &self,
        query: &str,
        document_ids: &[String],
        top_k: usize,
    ) -> Result<serde_json::Value>;
}

pub struct HttpDataService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDataService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn upstream(message: impl std::fmt::Display) -> Error {
        Error::Upstream {
            service: "data_service".into(),
            message: message.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl DataService for HttpDataService {
    async fn parse_document(&self, url: &str, deadline: Duration) -> Result<ParsedDocument> {
        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/v1/documents/parse", self.base_url))
            .timeout(deadline)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("document parse exceeded {deadline:?}"))
                } else {
                    Self::upstream(e)
                }
            })?;

        let status = response.status().as_u16();
        TraceEvent::UpstreamCall {
            service: "data_service".into(),
            endpoint: "/v1/documents/parse".into(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        if !response.status().is_success() {
            return Err(Self::upstream(format!("HTTP {status}")));
        }
        response.json().await.map_err(Self::upstream)
    }

    async fn semantic_query(
        &self,
        query: &str,
        document_ids: &[String],
        top_k: usize,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/v1/query", self.base_url))
            .json(&serde_json::json!({
                "query": query,
                "document_ids": document_ids,
                "top_k": top_k,
            }))
            .send()
            .await
            .map_err(Self::upstream)?;

        let status = response.status().as_u16();
        TraceEvent::UpstreamCall {
            service: "data_service".into(),
            endpoint: "/v1/query".into(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        if !response.status().is_success() {
            return Err(Self::upstream(format!("HTTP {status}")));
        }
        response.json().await.map_err(Self::upstream)
    }
}
