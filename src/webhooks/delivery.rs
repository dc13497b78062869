//! HTTP webhook delivery.
//!
//! # Retry Strategy
//!
//! Exponential backoff from [`RetryConfig`]:
//! - Max retries: 3
//! - Base delay: 1 second
//! - Delays: 1s, 2s, 4s
//!
//! # Error Handling
//!
//! - Network errors: retry with backoff
//! - 4xx client errors: no retry
//! - 5xx server errors: retry with backoff
//! - Timeout: retry with backoff

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::ExposeSecret;

use super::config::{RetryConfig, WebhookConfig};
use super::payload::{WebhookPayload, compute_hmac_signature};
use crate::connectors::WebhookSink;
use crate::models::ChangeEvent;
use crate::{Result, duration_to_millis};

/// Result of a webhook delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    /// Whether the delivery was successful.
    pub success: bool,

    /// HTTP status code (if a response was received).
    pub status_code: Option<u16>,

    /// Number of attempts made.
    pub attempts: u32,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Error message (if failed).
    pub error: Option<String>,
}

impl DeliveryResult {
    /// Creates a successful delivery result.
    #[must_use]
    pub const fn success(status_code: u16, attempts: u32, duration_ms: u64) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            attempts,
            duration_ms,
            error: None,
        }
    }

    /// Creates a failed delivery result.
    #[must_use]
    pub const fn failure(
        status_code: Option<u16>,
        error: String,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: false,
            status_code,
            attempts,
            duration_ms,
            error: Some(error),
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    Status(u16),
    Transport(String),
}

impl AttemptError {
    const fn status(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            Self::Transport(_) => None,
        }
    }

    const fn is_client_error(&self) -> bool {
        matches!(self, Self::Status(code) if *code >= 400 && *code < 500)
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(code) => write!(f, "HTTP {code} response"),
            Self::Transport(cause) => write!(f, "HTTP request failed: {cause}"),
        }
    }
}

/// Webhook sink that POSTs signed change payloads with retries.
pub struct HttpWebhookSink {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl HttpWebhookSink {
    /// Creates a sink with pooled connections.
    #[must_use]
    pub fn new(config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("Docwatch/{}", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, config }
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry(&self) -> &RetryConfig {
        &self.config.retry
    }

    /// Attempts a single delivery without retries.
    async fn attempt_delivery(
        &self,
        url: &str,
        payload: &WebhookPayload,
        body: &str,
    ) -> std::result::Result<u16, AttemptError> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Docwatch-Event", &payload.event_type)
            .header("X-Docwatch-Delivery-Id", &payload.event_id)
            .timeout(Duration::from_secs(self.config.retry.timeout_secs));

        if let Some(token) = &self.config.bearer_token {
            request = request.header("Authorization", format!("Bearer {}", token.expose_secret()));
        }
        if let Some(secret) = self.config.hmac_secret() {
            request = request.header(
                "X-Docwatch-Signature",
                compute_hmac_signature(secret.expose_secret(), body),
            );
        }

        let response = request
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(AttemptError::Status(status.as_u16()))
        }
    }

    /// Delivers with retry logic.
    async fn deliver_with_retry(&self, url: &str, payload: &WebhookPayload) -> DeliveryResult {
        let start = Instant::now();
        let body = payload.to_json();
        let retry = &self.config.retry;
        let max_attempts = retry.max_retries + 1;
        let mut attempt = 1;

        loop {
            match self.attempt_delivery(url, payload, &body).await {
                Ok(status_code) => {
                    return DeliveryResult::success(
                        status_code,
                        attempt,
                        duration_to_millis(start.elapsed()),
                    );
                },
                Err(error) if error.is_client_error() || attempt >= max_attempts => {
                    return DeliveryResult::failure(
                        error.status(),
                        error.to_string(),
                        attempt,
                        duration_to_millis(start.elapsed()),
                    );
                },
                Err(error) => {
                    let delay_ms = retry.delay_for_attempt(attempt);
                    tracing::debug!(
                        url,
                        attempt,
                        delay_ms,
                        error = %error,
                        "Webhook delivery failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                },
            }
        }
    }
}

impl std::fmt::Debug for HttpWebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWebhookSink")
            .field("retry", &self.config.retry)
            .field("signed", &self.config.hmac_secret().is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    #[tracing::instrument(
        name = "docwatch.webhook.deliver",
        skip(self, event),
        fields(doc_token = %event.doc_token, event_id = %event.id)
    )]
    async fn deliver(&self, url: &str, event: &ChangeEvent) -> Result<DeliveryResult> {
        let payload = WebhookPayload::from_change(event);
        let result = self.deliver_with_retry(url, &payload).await;

        let status = if result.success { "success" } else { "failure" };
        metrics::counter!("docwatch_webhook_deliveries_total", "status" => status).increment(1);
        if result.success {
            tracing::debug!(attempts = result.attempts, "Webhook delivered");
        } else {
            tracing::warn!(
                attempts = result.attempts,
                error = result.error.as_deref().unwrap_or_default(),
                "Webhook delivery failed"
            );
        }

        Ok(result)
    }
}
