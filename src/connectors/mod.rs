//! External collaborators: the document source and the action sinks.
//!
//! The core only talks to these through async traits, so the poller and the
//! rules engine can run against HTTP adapters in production and against
//! [`memory`] fakes in tests.
//!
//! ```text
//! ┌──────────────┐  fetch_metadata / fetch_content  ┌──────────────────┐
//! │  DocPoller   │ ───────────────────────────────▶ │ HttpDocumentSource│
//! └──────┬───────┘                                  └──────────────────┘
//!        │ notify (default card)
//!        ▼
//! ┌──────────────┐  notify / webhook / task / aggregate
//! │ RulesEngine  │ ───────────────────────────────▶ ActionSinks
//! └──────────────┘
//! ```
//!
//! Contracts:
//! - Fetchers never retry; the poller owns retry and backoff.
//! - Permanent source failures (not found, permission denied) are `Ok(None)`.
//! - Sink failures are reported as errors and never abort the caller's loop.

pub mod aggregate;
pub mod http;
pub mod logging;
pub mod memory;

#[cfg(test)]
pub(crate) mod stub_server;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::models::{ChangeEvent, ChangeType, DocMetadata, DocType};
use crate::webhooks::{DeliveryResult, HttpWebhookSink, WebhookConfig};

pub use aggregate::AggregationBuffer;
pub use http::{HttpDocumentSource, HttpNotifySink, HttpTaskSink};
pub use logging::{LogNotifySink, LogTaskSink};
pub use memory::{MemoryDocumentSource, RecordingSink};

/// Fetches document metadata from the hosting service.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetches the current metadata of a document.
    ///
    /// # Errors
    ///
    /// Returns an error for transient failures only. Missing or forbidden
    /// documents are `Ok(None)`.
    async fn fetch_metadata(
        &self,
        doc_token: &str,
        doc_type: DocType,
    ) -> Result<Option<DocMetadata>>;
}

/// Fetches the plain-text content of a document.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetches the current content of a document.
    ///
    /// # Errors
    ///
    /// Returns an error for transient failures only.
    async fn fetch_content(&self, doc_token: &str) -> Result<Option<String>>;
}

/// Sends a chat message.
#[async_trait]
pub trait NotifySink: Send + Sync {
    /// Sends `message` to `target` and returns the message ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be delivered.
    async fn notify(&self, target: &str, message: &str) -> Result<String>;
}

/// POSTs change payloads to arbitrary URLs.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Delivers the change payload to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request could not be built; delivery
    /// failures are reported through [`DeliveryResult`].
    async fn deliver(&self, url: &str, event: &ChangeEvent) -> Result<DeliveryResult>;
}

/// A task to create in an external tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Project or assignee hint from the rule.
    pub target: Option<String>,
    /// Rendered task title.
    pub title: String,
    /// Document the change belongs to.
    pub doc_token: String,
    /// Change classification.
    pub change_type: ChangeType,
    /// Change event ID.
    pub event_id: String,
}

/// Creates tasks from rule templates.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Creates the task and returns its external ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker rejected or never received the task.
    async fn create_task(&self, request: &TaskRequest) -> Result<String>;
}

/// Buffers changes for a batched summary.
#[async_trait]
pub trait AggregateSink: Send + Sync {
    /// Adds a change to the buffer for `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the change could not be buffered.
    async fn add(&self, target: &str, event: &ChangeEvent) -> Result<()>;
}

/// The sinks a rule action can reach.
#[derive(Clone)]
pub struct ActionSinks {
    /// Chat messages.
    pub notify: Arc<dyn NotifySink>,
    /// Webhook deliveries.
    pub webhook: Arc<dyn WebhookSink>,
    /// Task creation.
    pub task: Arc<dyn TaskSink>,
    /// Batched summaries.
    pub aggregate: Arc<dyn AggregateSink>,
}

impl ActionSinks {
    /// Bundles explicit sinks.
    #[must_use]
    pub fn new(
        notify: Arc<dyn NotifySink>,
        webhook: Arc<dyn WebhookSink>,
        task: Arc<dyn TaskSink>,
        aggregate: Arc<dyn AggregateSink>,
    ) -> Self {
        Self {
            notify,
            webhook,
            task,
            aggregate,
        }
    }

    /// Log-only notify and task sinks, real webhook delivery, and an
    /// aggregation buffer that flushes into the log.
    #[must_use]
    pub fn logging() -> Self {
        let notify: Arc<dyn NotifySink> = Arc::new(LogNotifySink);
        Self {
            aggregate: Arc::new(AggregationBuffer::new(Arc::clone(&notify))),
            notify,
            webhook: Arc::new(HttpWebhookSink::new(WebhookConfig::default())),
            task: Arc::new(LogTaskSink),
        }
    }

    /// Routes every action kind into one recording sink.
    #[must_use]
    pub fn recording(sink: &Arc<RecordingSink>) -> Self {
        Self {
            notify: Arc::clone(sink) as Arc<dyn NotifySink>,
            webhook: Arc::clone(sink) as Arc<dyn WebhookSink>,
            task: Arc::clone(sink) as Arc<dyn TaskSink>,
            aggregate: Arc::clone(sink) as Arc<dyn AggregateSink>,
        }
    }
}

impl std::fmt::Debug for ActionSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSinks").finish_non_exhaustive()
    }
}
