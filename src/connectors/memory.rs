//! In-process source and sinks for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AggregateSink, ContentFetcher, MetadataFetcher, NotifySink, TaskRequest, TaskSink, WebhookSink,
};
use crate::models::{ChangeEvent, DocMetadata, DocType};
use crate::sync::acquire_lock;
use crate::webhooks::DeliveryResult;
use crate::{Error, Result};

#[derive(Debug, Default, Clone)]
struct SourceEntry {
    metadata: Option<DocMetadata>,
    content: Option<String>,
    failures_remaining: u32,
}

/// Scriptable document source.
///
/// Unknown tokens behave like a permanent not-found.
#[derive(Debug, Default)]
pub struct MemoryDocumentSource {
    documents: Mutex<HashMap<String, SourceEntry>>,
    delay: Mutex<Option<Duration>>,
    metadata_fetches: AtomicUsize,
    content_fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryDocumentSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a document's metadata.
    pub fn set_metadata(&self, metadata: DocMetadata) {
        let token = metadata.doc_token.clone();
        let mut documents = acquire_lock(&self.documents);
        documents.entry(token).or_default().metadata = Some(metadata);
    }

    /// Sets the last modifier and modification time, creating a `docx`
    /// document titled after its token if needed.
    pub fn set_state(&self, doc_token: &str, user: &str, modified_time: i64) {
        let mut documents = acquire_lock(&self.documents);
        let entry = documents.entry(doc_token.to_string()).or_default();
        let metadata = entry.metadata.get_or_insert_with(|| DocMetadata {
            doc_token: doc_token.to_string(),
            title: doc_token.to_string(),
            owner_id: String::new(),
            created_time: modified_time,
            last_modified_user: String::new(),
            last_modified_time: 0,
            doc_type: DocType::Docx,
        });
        metadata.last_modified_user = user.to_string();
        metadata.last_modified_time = modified_time;
    }

    /// Replaces a document's content.
    pub fn set_content(&self, doc_token: &str, content: impl Into<String>) {
        let mut documents = acquire_lock(&self.documents);
        documents.entry(doc_token.to_string()).or_default().content = Some(content.into());
    }

    /// Removes a document entirely.
    pub fn remove(&self, doc_token: &str) {
        acquire_lock(&self.documents).remove(doc_token);
    }

    /// Makes the next `count` metadata fetches for `doc_token` fail transiently.
    pub fn fail_next(&self, doc_token: &str, count: u32) {
        let mut documents = acquire_lock(&self.documents);
        documents
            .entry(doc_token.to_string())
            .or_default()
            .failures_remaining = count;
    }

    /// Delays every fetch by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *acquire_lock(&self.delay) = delay;
    }

    /// Number of metadata fetches served, including failures.
    #[must_use]
    pub fn metadata_fetches(&self) -> usize {
        self.metadata_fetches.load(Ordering::Relaxed)
    }

    /// Number of content fetches served.
    #[must_use]
    pub fn content_fetches(&self) -> usize {
        self.content_fetches.load(Ordering::Relaxed)
    }

    /// Highest number of metadata fetches observed in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *acquire_lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MetadataFetcher for MemoryDocumentSource {
    async fn fetch_metadata(
        &self,
        doc_token: &str,
        _doc_type: DocType,
    ) -> Result<Option<DocMetadata>> {
        self.metadata_fetches.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.pause().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut documents = acquire_lock(&self.documents);
        let Some(entry) = documents.get_mut(doc_token) else {
            return Ok(None);
        };
        if entry.failures_remaining > 0 {
            entry.failures_remaining -= 1;
            return Err(Error::failed("fetch_metadata", "injected failure"));
        }
        Ok(entry.metadata.clone())
    }
}

#[async_trait]
impl ContentFetcher for MemoryDocumentSource {
    async fn fetch_content(&self, doc_token: &str) -> Result<Option<String>> {
        self.content_fetches.fetch_add(1, Ordering::Relaxed);
        self.pause().await;

        let documents = acquire_lock(&self.documents);
        Ok(documents.get(doc_token).and_then(|e| e.content.clone()))
    }
}

/// Records every sink call; selected targets can be made to fail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<(String, String)>>,
    webhooks: Mutex<Vec<(String, String)>>,
    tasks: Mutex<Vec<TaskRequest>>,
    aggregated: Mutex<Vec<(String, String)>>,
    failing_targets: Mutex<HashSet<String>>,
}

impl RecordingSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call addressed to `target` fail.
    pub fn fail_target(&self, target: impl Into<String>) {
        acquire_lock(&self.failing_targets).insert(target.into());
    }

    /// `(target, message)` pairs sent through `notify`.
    #[must_use]
    pub fn notifications(&self) -> Vec<(String, String)> {
        acquire_lock(&self.notifications).clone()
    }

    /// `(url, event_id)` pairs delivered as webhooks.
    #[must_use]
    pub fn webhooks(&self) -> Vec<(String, String)> {
        acquire_lock(&self.webhooks).clone()
    }

    /// Task requests received.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskRequest> {
        acquire_lock(&self.tasks).clone()
    }

    /// `(target, event_id)` pairs buffered for aggregation.
    #[must_use]
    pub fn aggregated(&self) -> Vec<(String, String)> {
        acquire_lock(&self.aggregated).clone()
    }

    fn is_failing(&self, target: &str) -> bool {
        acquire_lock(&self.failing_targets).contains(target)
    }

    fn rejected(operation: &str, target: &str) -> Error {
        Error::failed(operation, format!("target {target} rejected"))
    }
}

#[async_trait]
impl NotifySink for RecordingSink {
    async fn notify(&self, target: &str, message: &str) -> Result<String> {
        if self.is_failing(target) {
            return Err(Self::rejected("notify", target));
        }
        let mut notifications = acquire_lock(&self.notifications);
        notifications.push((target.to_string(), message.to_string()));
        Ok(format!("msg-{}", notifications.len()))
    }
}

#[async_trait]
impl WebhookSink for RecordingSink {
    async fn deliver(&self, url: &str, event: &ChangeEvent) -> Result<DeliveryResult> {
        if self.is_failing(url) {
            return Ok(DeliveryResult::failure(
                Some(503),
                "HTTP 503 response".to_string(),
                1,
                0,
            ));
        }
        acquire_lock(&self.webhooks).push((url.to_string(), event.id.clone()));
        Ok(DeliveryResult::success(200, 1, 0))
    }
}

#[async_trait]
impl TaskSink for RecordingSink {
    async fn create_task(&self, request: &TaskRequest) -> Result<String> {
        let target = request.target.as_deref().unwrap_or_default();
        if self.is_failing(target) {
            return Err(Self::rejected("create_task", target));
        }
        let mut tasks = acquire_lock(&self.tasks);
        tasks.push(request.clone());
        Ok(format!("task-{}", tasks.len()))
    }
}

#[async_trait]
impl AggregateSink for RecordingSink {
    async fn add(&self, target: &str, event: &ChangeEvent) -> Result<()> {
        if self.is_failing(target) {
            return Err(Self::rejected("aggregate", target));
        }
        acquire_lock(&self.aggregated).push((target.to_string(), event.id.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_serves_state_and_injected_failures() {
        let source = MemoryDocumentSource::new();
        source.set_state("doc", "U1", 1000);
        source.fail_next("doc", 1);

        assert!(source.fetch_metadata("doc", DocType::Docx).await.is_err());
        let metadata = source
            .fetch_metadata("doc", DocType::Docx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.last_modified_user, "U1");
        assert!(source.fetch_metadata("missing", DocType::Docx).await.unwrap().is_none());
        assert_eq!(source.metadata_fetches(), 3);

        source.remove("doc");
        assert!(source.fetch_metadata("doc", DocType::Docx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_metadata_replaces_whole_record() {
        let source = MemoryDocumentSource::new();
        source.set_state("doc", "U1", 1000);
        source.set_content("doc", "body\n");
        source.set_metadata(DocMetadata {
            doc_token: "doc".to_string(),
            title: "Quarterly plan".to_string(),
            owner_id: "ou_owner".to_string(),
            created_time: 10,
            last_modified_user: "U2".to_string(),
            last_modified_time: 2000,
            doc_type: DocType::Sheet,
        });

        let metadata = source
            .fetch_metadata("doc", DocType::Sheet)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.title, "Quarterly plan");
        assert_eq!(metadata.last_modified_user, "U2");
        assert_eq!(metadata.doc_type, DocType::Sheet);
        assert_eq!(source.fetch_content("doc").await.unwrap().as_deref(), Some("body\n"));
    }

    #[tokio::test]
    async fn test_recording_sink_failing_target() {
        let sink = RecordingSink::new();
        sink.fail_target("bad");

        assert!(sink.notify("bad", "x").await.is_err());
        assert_eq!(sink.notify("good", "x").await.unwrap(), "msg-1");
        assert_eq!(sink.notifications(), vec![("good".to_string(), "x".to_string())]);
    }
}
