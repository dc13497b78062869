//! Component wiring for a running watcher.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use super::CommandSurface;
use crate::clock::{Clock, SystemClock};
use crate::config::DocwatchConfig;
use crate::connectors::{
    ActionSinks, AggregateSink, AggregationBuffer, ContentFetcher, HttpDocumentSource,
    HttpNotifySink, HttpTaskSink, LogNotifySink, LogTaskSink, MemoryDocumentSource,
    MetadataFetcher, NotifySink, TaskSink, WebhookSink,
};
use crate::services::{
    DocPoller, DocSnapshotService, PollCycleReport, PollerDeps, RulesEngine, RulesIntegration,
};
use crate::storage::{ChangeEventStore, RuleStore, SnapshotStore, SqliteStore, TrackedDocumentStore};
use crate::webhooks::HttpWebhookSink;
use crate::Result;

/// Time allowed for the poll loop and the rule queue to wind down.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// External collaborators of an [`App`].
#[derive(Clone)]
pub struct Backends {
    /// Metadata source.
    pub metadata: Arc<dyn MetadataFetcher>,
    /// Content source.
    pub content: Arc<dyn ContentFetcher>,
    /// Notification sink, shared by default cards, rules, and digests.
    pub notify: Arc<dyn NotifySink>,
    /// Webhook delivery.
    pub webhook: Arc<dyn WebhookSink>,
    /// Task creation.
    pub task: Arc<dyn TaskSink>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Builds HTTP adapters for configured endpoints and log sinks otherwise.
    ///
    /// Without a source URL the watcher runs against an empty in-memory
    /// source, so every tracked document reports as missing.
    #[must_use]
    pub fn from_config(config: &DocwatchConfig) -> Self {
        let (metadata, content): (Arc<dyn MetadataFetcher>, Arc<dyn ContentFetcher>) =
            match &config.source.base_url {
                Some(base_url) => {
                    let source = Arc::new(HttpDocumentSource::new(
                        base_url.as_str(),
                        config.source.api_token.clone(),
                        config.source.timeout(),
                    ));
                    (
                        Arc::clone(&source) as Arc<dyn MetadataFetcher>,
                        source as Arc<dyn ContentFetcher>,
                    )
                },
                None => {
                    warn!("No document source configured, using an empty in-memory source");
                    let source = Arc::new(MemoryDocumentSource::new());
                    (
                        Arc::clone(&source) as Arc<dyn MetadataFetcher>,
                        source as Arc<dyn ContentFetcher>,
                    )
                },
            };

        let timeout = config.source.timeout();
        let notify: Arc<dyn NotifySink> = match &config.notify.endpoint {
            Some(endpoint) => Arc::new(HttpNotifySink::new(
                endpoint.as_str(),
                config.notify.token.clone(),
                timeout,
            )),
            None => Arc::new(LogNotifySink),
        };
        let task: Arc<dyn TaskSink> = match &config.tasks.endpoint {
            Some(endpoint) => Arc::new(HttpTaskSink::new(
                endpoint.as_str(),
                config.tasks.token.clone(),
                timeout,
            )),
            None => Arc::new(LogTaskSink),
        };

        Self {
            metadata,
            content,
            notify,
            webhook: Arc::new(HttpWebhookSink::new(config.webhook.clone())),
            task,
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Counts from [`App::seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Documents newly tracked.
    pub documents_added: usize,
    /// Rules newly created.
    pub rules_added: usize,
    /// Rules skipped because an equivalent rule already exists.
    pub rules_skipped: usize,
}

/// A fully wired watcher for one owner.
pub struct App {
    config: DocwatchConfig,
    poller: DocPoller,
    surface: CommandSurface,
    aggregate: Arc<AggregationBuffer>,
}

impl App {
    /// Opens the `SQLite` store under the data directory and wires every
    /// component from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the configuration
    /// holds an invalid UTC offset.
    pub fn open(config: DocwatchConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(config.database_path())?);
        let backends = Backends::from_config(&config);
        Self::assemble(config, store, backends)
    }

    /// Wires every component over an explicit store and backends.
    ///
    /// Tracked documents persisted by an earlier run are restored; a restore
    /// failure is logged and the watcher starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for an invalid UTC offset.
    pub fn assemble<S>(config: DocwatchConfig, store: Arc<S>, backends: Backends) -> Result<Self>
    where
        S: TrackedDocumentStore + SnapshotStore + RuleStore + ChangeEventStore + 'static,
    {
        let owner_id = config.owner_id().to_string();
        let aggregate = Arc::new(AggregationBuffer::new(Arc::clone(&backends.notify)));
        let sinks = ActionSinks::new(
            Arc::clone(&backends.notify),
            backends.webhook,
            backends.task,
            Arc::clone(&aggregate) as Arc<dyn AggregateSink>,
        );

        let mut engine = RulesEngine::new(
            Arc::clone(&store) as Arc<dyn RuleStore>,
            owner_id.as_str(),
            sinks,
            Arc::clone(&backends.clock),
        );
        if let Some(offset) = config.rules_engine.utc_offset()? {
            engine = engine.with_utc_offset(offset);
        }
        let rules = Arc::new(RulesIntegration::new(
            engine,
            config.rules_engine.queue_options(),
        ));
        rules.initialize_rules_system(&owner_id)?;

        let snapshots = Arc::new(DocSnapshotService::new(
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            owner_id.as_str(),
            config.snapshots.policy(),
            Arc::clone(&backends.clock),
        ));

        let events = Arc::clone(&store) as Arc<dyn ChangeEventStore>;
        let deps = PollerDeps {
            metadata: backends.metadata,
            content: backends.content,
            notify: backends.notify,
            snapshots,
            rules,
            tracked_store: store as Arc<dyn TrackedDocumentStore>,
            event_store: Arc::clone(&events),
            clock: backends.clock,
        };
        let poller = DocPoller::new(owner_id.as_str(), config.poller.options(), deps);

        match poller.restore() {
            Ok(restored) => info!(owner_id = %owner_id, restored, "Restored tracked documents"),
            Err(e) => warn!(error = %e, "Failed to restore tracked documents"),
        }

        Ok(Self {
            surface: CommandSurface::new(poller.clone(), events),
            config,
            poller,
            aggregate,
        })
    }

    /// Returns the configuration the app was built from.
    #[must_use]
    pub const fn config(&self) -> &DocwatchConfig {
        &self.config
    }

    /// Returns the poller.
    #[must_use]
    pub const fn poller(&self) -> &DocPoller {
        &self.poller
    }

    /// Returns the command surface.
    #[must_use]
    pub const fn surface(&self) -> &CommandSurface {
        &self.surface
    }

    /// Tracks the configured documents and creates the configured rules.
    ///
    /// A configured rule is skipped when its document already has a rule
    /// with the same name, or, for unnamed rules, the same condition and
    /// action. Seeding twice is therefore a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first tracking, validation, or store error.
    pub fn seed(&self) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        for doc in &self.config.documents {
            if self
                .poller
                .start_tracking_doc(&doc.token, doc.doc_type, &doc.notify_target)?
            {
                report.documents_added += 1;
            }
        }

        let engine = self.poller.rules().engine();
        for entry in &self.config.rules {
            let (condition, action) = entry.typed()?;
            let name = entry.name.trim();
            let exists = engine.get_rules_for_doc(&entry.doc_token)?.iter().any(|rule| {
                if name.is_empty() {
                    rule.condition == condition && rule.action == action
                } else {
                    rule.name == name
                }
            });
            if exists {
                report.rules_skipped += 1;
                continue;
            }
            engine.create_rule(&entry.doc_token, name, condition, action)?;
            report.rules_added += 1;
        }

        if report.documents_added + report.rules_added > 0 {
            info!(
                documents = report.documents_added,
                rules = report.rules_added,
                "Seeded from configuration"
            );
        }
        Ok(report)
    }

    /// Runs a single cycle, then drains the rule queue and flushes digests.
    pub async fn poll_once(&self) -> PollCycleReport {
        let report = self.poller.poll_once().await;
        let timeout = Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS);
        if !self.poller.rules().drain_rule_queue(timeout).await {
            warn!("Rule queue did not drain in time");
        }
        self.aggregate.flush().await;
        report
    }

    /// Runs the poll loop and the periodic digest flush until `shutdown`
    /// resolves, then stops both and drains the rule queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] outside a Tokio runtime.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.poller.start()?;
        let (stop_flush, flush_rx) = watch::channel(false);
        let flush_interval =
            Duration::from_millis(self.config.rules_engine.aggregate_flush_interval_ms.max(1));
        let flusher = self.aggregate.spawn_periodic_flush(flush_interval, flush_rx);

        shutdown.await;
        info!("Shutting down");

        let timeout = Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS);
        if !self.poller.shutdown(timeout).await {
            warn!("Shutdown did not complete within {DEFAULT_SHUTDOWN_TIMEOUT_MS}ms");
        }
        stop_flush.send_replace(true);
        if let Err(e) = flusher.await {
            warn!(error = %e, "Digest flush task failed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("owner_id", &self.poller.owner_id())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connectors::RecordingSink;
    use crate::storage::MemoryStore;

    const CONFIG: &str = r#"
owner_id = "ops"

[rules_engine]
async_mode = false

[snapshots]
min_compression_ratio = 0.0

[[documents]]
token = "doc1"
doc_type = "docx"
notify_target = "chat-1"

[[rules]]
doc_token = "doc1"
name = "alice edits"
condition = { type = "modified_by_user", value = "alice" }
action = { type = "notify", target = "chat-2" }
"#;

    type Harness = (App, Arc<MemoryDocumentSource>, Arc<RecordingSink>, Arc<ManualClock>);

    fn app(store: Arc<MemoryStore>) -> Harness {
        let source = Arc::new(MemoryDocumentSource::new());
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let backends = Backends {
            metadata: source.clone(),
            content: source.clone(),
            notify: sink.clone(),
            webhook: sink.clone(),
            task: sink.clone(),
            clock: clock.clone(),
        };
        let config = DocwatchConfig::from_toml(CONFIG).unwrap();
        let app = App::assemble(config, store, backends).unwrap();
        (app, source, sink, clock)
    }

    #[test]
    fn test_seed_is_idempotent() {
        let (app, _, _, _) = app(Arc::new(MemoryStore::new()));

        let first = app.seed().unwrap();
        assert_eq!(first.documents_added, 1);
        assert_eq!(first.rules_added, 1);

        let second = app.seed().unwrap();
        assert_eq!(second, SeedReport {
            documents_added: 0,
            rules_added: 0,
            rules_skipped: 1,
        });
        assert_eq!(app.surface().list_rules("doc1").unwrap().len(), 1);
    }

    #[test]
    fn test_tracking_survives_reassembly() {
        let store = Arc::new(MemoryStore::new());
        let (first, _, _, _) = app(Arc::clone(&store));
        first.seed().unwrap();
        drop(first);

        let (second, _, _, _) = app(store);
        assert_eq!(second.poller().list_tracked().len(), 1);
        assert_eq!(second.poller().owner_id(), "ops");
    }

    #[tokio::test]
    async fn test_poll_once_runs_seeded_rules() {
        let (app, source, sink, clock) = app(Arc::new(MemoryStore::new()));
        app.seed().unwrap();

        source.set_state("doc1", "bob", 1_000);
        source.set_content("doc1", "line one\n");
        let report = app.poll_once().await;
        assert_eq!(report.changed, 1);
        assert!(sink.notifications().is_empty());

        clock.advance(10_000);
        source.set_state("doc1", "alice", 2_000);
        source.set_content("doc1", "line one\nline two\n");
        let report = app.poll_once().await;
        assert_eq!(report.changed, 1);

        let targets: Vec<String> = sink
            .notifications()
            .into_iter()
            .map(|(target, _)| target)
            .collect();
        assert!(targets.contains(&"chat-1".to_string()));
        assert!(targets.contains(&"chat-2".to_string()));
    }

    #[tokio::test]
    async fn test_run_until_stops_on_signal() {
        let (app, _, _, _) = app(Arc::new(MemoryStore::new()));
        app.run_until(async {}).await.unwrap();
        assert!(!app.poller().is_running());
    }
}
