//! HTTP adapters for the document source and the notify/task sinks.
//!
//! The document source speaks a small REST contract:
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET {base}/documents/{token}/metadata?type={doc_type}` | [`DocMetadata`] JSON |
//! | `GET {base}/documents/{token}/content` | plain text |
//!
//! `404` and `403` map to `Ok(None)`. Any other failure is a transient error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{ContentFetcher, MetadataFetcher, NotifySink, TaskRequest, TaskSink};
use crate::models::{DocMetadata, DocType};
use crate::{Error, Result};

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(format!("Docwatch/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn with_auth(request: reqwest::RequestBuilder, token: Option<&SecretString>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token.expose_secret()),
        None => request,
    }
}

/// Returns `Ok(None)` for permanent source failures, the response otherwise.
fn classify_response(
    operation: &str,
    response: reqwest::Response,
) -> Result<Option<reqwest::Response>> {
    match response.status() {
        status if status.is_success() => Ok(Some(response)),
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(None),
        status => Err(Error::failed(operation, format!("HTTP {status}"))),
    }
}

/// Reads metadata and content from the document hosting API.
pub struct HttpDocumentSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpDocumentSource {
    /// Creates a source rooted at `base_url`.
    ///
    /// `timeout` bounds each request; the poller adds its own deadline on top.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, operation: &str, url: &str) -> Result<Option<reqwest::Response>> {
        let request = with_auth(self.client.get(url), self.token.as_ref());
        let response = request
            .send()
            .await
            .map_err(|e| Error::failed(operation, e))?;
        classify_response(operation, response)
    }
}

impl std::fmt::Debug for HttpDocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDocumentSource")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MetadataFetcher for HttpDocumentSource {
    async fn fetch_metadata(
        &self,
        doc_token: &str,
        doc_type: DocType,
    ) -> Result<Option<DocMetadata>> {
        let url = format!(
            "{}/documents/{doc_token}/metadata?type={doc_type}",
            self.base_url
        );
        let Some(response) = self.get("fetch_metadata", &url).await? else {
            tracing::debug!(doc_token, "Document metadata unavailable");
            return Ok(None);
        };
        let metadata = response
            .json::<DocMetadata>()
            .await
            .map_err(|e| Error::failed("fetch_metadata", e))?;
        Ok(Some(metadata))
    }
}

#[async_trait]
impl ContentFetcher for HttpDocumentSource {
    async fn fetch_content(&self, doc_token: &str) -> Result<Option<String>> {
        let url = format!("{}/documents/{doc_token}/content", self.base_url);
        let Some(response) = self.get("fetch_content", &url).await? else {
            return Ok(None);
        };
        let text = response
            .text()
            .await
            .map_err(|e| Error::failed("fetch_content", e))?;
        Ok(Some(text))
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    #[serde(alias = "message_id", alias = "task_id")]
    id: Option<String>,
}

async fn post_json<T: serde::Serialize + Sync>(
    client: &reqwest::Client,
    operation: &str,
    endpoint: &str,
    token: Option<&SecretString>,
    body: &T,
) -> Result<String> {
    let response = with_auth(client.post(endpoint), token)
        .json(body)
        .send()
        .await
        .map_err(|e| Error::failed(operation, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::failed(operation, format!("HTTP {status}")));
    }

    // Receivers that return no ID still accepted the request.
    let created = response.json::<CreatedResponse>().await.ok();
    Ok(created
        .and_then(|c| c.id)
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()))
}

/// Posts `{target, message}` to a chat relay endpoint.
pub struct HttpNotifySink {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
}

impl HttpNotifySink {
    /// Creates a sink posting to `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: Option<SecretString>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: endpoint.into(),
            token,
        }
    }
}

impl std::fmt::Debug for HttpNotifySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNotifySink")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NotifySink for HttpNotifySink {
    async fn notify(&self, target: &str, message: &str) -> Result<String> {
        let body = serde_json::json!({ "target": target, "message": message });
        post_json(
            &self.client,
            "notify",
            &self.endpoint,
            self.token.as_ref(),
            &body,
        )
        .await
    }
}

/// Posts [`TaskRequest`] JSON to a task tracker endpoint.
pub struct HttpTaskSink {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
}

impl HttpTaskSink {
    /// Creates a sink posting to `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: Option<SecretString>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: endpoint.into(),
            token,
        }
    }
}

impl std::fmt::Debug for HttpTaskSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTaskSink")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskSink for HttpTaskSink {
    async fn create_task(&self, request: &TaskRequest) -> Result<String> {
        post_json(
            &self.client,
            "create_task",
            &self.endpoint,
            self.token.as_ref(),
            request,
        )
        .await
    }
}
