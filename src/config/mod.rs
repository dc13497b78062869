//! Configuration management.
//!
//! `DocwatchConfig` is read from TOML, then `DOCWATCH_*` environment
//! variables override individual fields. Every section is optional.
//!
//! ```toml
//! owner_id = "ou_123"
//!
//! [poller]
//! interval_ms = 30000
//!
//! [source]
//! base_url = "https://docs.example.com/api"
//! api_token = "..."
//!
//! [[documents]]
//! token = "doccn123"
//! doc_type = "docx"
//! notify_target = "oc_team"
//!
//! [[rules]]
//! doc_token = "doccn123"
//! condition = { type = "modified_by_user", value = "ou_456" }
//! action = { type = "notify", target = "oc_alerts" }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::models::{DocType, RawAction, RawCondition, RuleAction, RuleCondition};
use crate::observability::{LoggingConfig, MetricsConfig};
use crate::services::{
    DEFAULT_BATCH_SIZE, DEFAULT_COMPRESSION_LEVEL, DEFAULT_DEBOUNCE_WINDOW_MS,
    DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_POLLS, DEFAULT_MAX_DOC_SIZE_BYTES,
    DEFAULT_MAX_ERRORS_PER_HOUR, DEFAULT_MAX_RETRIES, DEFAULT_MAX_SNAPSHOTS_PER_DOC,
    DEFAULT_MIN_COMPRESSION_RATIO, DEFAULT_MIN_SUCCESS_RATE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RETENTION_DAYS, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_SYNC_TIMEOUT_MS, PollerOptions, RuleQueueOptions, SnapshotPolicy,
};
use crate::webhooks::{WebhookConfig, optional_secret};
use crate::{Error, Result};

/// Owner used when none is configured.
pub const DEFAULT_OWNER_ID: &str = "default";

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "docwatch.db";

/// Default HTTP timeout for connectors.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Default aggregate flush interval.
pub const DEFAULT_AGGREGATE_FLUSH_INTERVAL_MS: u64 = 300_000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocwatchConfig {
    /// Owner whose documents and rules are watched.
    pub owner_id: Option<String>,
    /// Directory holding the database. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    /// Poller settings.
    pub poller: PollerSection,
    /// Snapshot policy.
    pub snapshots: SnapshotSection,
    /// Rule evaluation settings.
    pub rules_engine: RulesSection,
    /// Document source.
    pub source: SourceSection,
    /// Notification endpoint.
    pub notify: EndpointSection,
    /// Task tracker endpoint.
    pub tasks: EndpointSection,
    /// Webhook delivery.
    pub webhook: WebhookConfig,
    /// Log output.
    pub logging: LoggingConfig,
    /// Metrics exporter.
    pub metrics: MetricsConfig,
    /// Documents tracked at startup.
    pub documents: Vec<DocumentEntry>,
    /// Rules created at startup.
    pub rules: Vec<RuleEntry>,
}

/// `[poller]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSection {
    /// Time between poll cycles.
    pub interval_ms: u64,
    /// Documents fetched at once.
    pub max_concurrent_polls: usize,
    /// Minimum time between notifications for one document.
    pub debounce_window_ms: i64,
    /// Deadline for one fetch.
    pub fetch_timeout_ms: u64,
    /// Retries after a failed fetch.
    pub max_retries: u32,
    /// Base backoff delay.
    pub retry_base_delay_ms: u64,
    /// Health threshold for the success rate.
    pub min_success_rate: f64,
    /// Health threshold for failed polls per hour.
    pub max_errors_per_hour: usize,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_polls: DEFAULT_MAX_CONCURRENT_POLLS,
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            min_success_rate: DEFAULT_MIN_SUCCESS_RATE,
            max_errors_per_hour: DEFAULT_MAX_ERRORS_PER_HOUR,
        }
    }
}

impl PollerSection {
    /// Converts to poller options.
    #[must_use]
    pub const fn options(&self) -> PollerOptions {
        PollerOptions {
            interval_ms: self.interval_ms,
            max_concurrent_polls: self.max_concurrent_polls,
            fetch_timeout_ms: self.fetch_timeout_ms,
            max_retries: self.max_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
            debounce_window_ms: self.debounce_window_ms,
            min_success_rate: self.min_success_rate,
            max_errors_per_hour: self.max_errors_per_hour,
        }
    }
}

/// `[snapshots]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSection {
    /// Content larger than this is not stored.
    pub max_doc_size_bytes: u64,
    /// Content compressing worse than this is not stored.
    pub min_compression_ratio: f64,
    /// Age limit; `0` disables age pruning.
    pub retention_days: u32,
    /// Count limit per document.
    pub max_snapshots_per_doc: usize,
    /// zstd level.
    pub compression_level: i32,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            max_doc_size_bytes: DEFAULT_MAX_DOC_SIZE_BYTES,
            min_compression_ratio: DEFAULT_MIN_COMPRESSION_RATIO,
            retention_days: DEFAULT_RETENTION_DAYS,
            max_snapshots_per_doc: DEFAULT_MAX_SNAPSHOTS_PER_DOC,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl SnapshotSection {
    /// Converts to a snapshot policy covering the text document types.
    #[must_use]
    pub fn policy(&self) -> SnapshotPolicy {
        SnapshotPolicy {
            max_doc_size_bytes: self.max_doc_size_bytes,
            min_compression_ratio: self.min_compression_ratio,
            retention_days: self.retention_days,
            max_snapshots_per_doc: self.max_snapshots_per_doc,
            compression_level: self.compression_level,
            ..SnapshotPolicy::default()
        }
    }
}

/// `[rules_engine]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesSection {
    /// `false` skips rule evaluation.
    pub enabled: bool,
    /// Queue changes for a background worker.
    pub async_mode: bool,
    /// Deadline for synchronous evaluation.
    pub timeout_ms: u64,
    /// Events per worker batch.
    pub batch_size: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Offset from UTC for `time_range` conditions. Host offset when unset.
    pub utc_offset_minutes: Option<i32>,
    /// How often aggregated changes are summarized.
    pub aggregate_flush_interval_ms: u64,
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            enabled: true,
            async_mode: true,
            timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            utc_offset_minutes: None,
            aggregate_flush_interval_ms: DEFAULT_AGGREGATE_FLUSH_INTERVAL_MS,
        }
    }
}

impl RulesSection {
    /// Converts to queue options.
    #[must_use]
    pub const fn queue_options(&self) -> RuleQueueOptions {
        RuleQueueOptions {
            enabled: self.enabled,
            async_mode: self.async_mode,
            timeout_ms: self.timeout_ms,
            batch_size: self.batch_size,
            capacity: self.queue_capacity,
        }
    }

    /// Returns the configured offset, if valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for offsets beyond ±24h.
    pub fn utc_offset(&self) -> Result<Option<chrono::FixedOffset>> {
        self.utc_offset_minutes
            .map(|minutes| {
                chrono::FixedOffset::east_opt(minutes.saturating_mul(60)).ok_or_else(|| {
                    Error::InvalidInput(format!("utc_offset_minutes out of range: {minutes}"))
                })
            })
            .transpose()
    }
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    /// Base URL of the document API. Unset means no source.
    pub base_url: Option<String>,
    /// Bearer token.
    #[serde(with = "optional_secret")]
    pub api_token: Option<SecretString>,
    /// Request timeout.
    pub timeout_ms: u64,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
        }
    }
}

impl SourceSection {
    /// Request timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `[notify]` and `[tasks]` sections. No endpoint means log-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSection {
    /// POST endpoint.
    pub endpoint: Option<String>,
    /// Bearer token.
    #[serde(with = "optional_secret")]
    pub token: Option<SecretString>,
}

/// One `[[documents]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    /// Document token.
    pub token: String,
    /// Document type.
    #[serde(default = "default_doc_type")]
    pub doc_type: DocType,
    /// Chat receiving default notifications.
    #[serde(default)]
    pub notify_target: String,
}

const fn default_doc_type() -> DocType {
    DocType::Docx
}

/// One `[[rules]]` entry in raw form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Document the rule applies to.
    pub doc_token: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Raw condition.
    pub condition: RawCondition,
    /// Raw action.
    pub action: RawAction,
}

impl RuleEntry {
    /// Validates the raw condition and action into typed variants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] with the specific reason.
    pub fn typed(&self) -> Result<(RuleCondition, RuleAction)> {
        Ok((
            RuleCondition::try_from(self.condition.clone())?,
            RuleAction::try_from(self.action.clone())?,
        ))
    }
}

impl DocwatchConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses TOML and validates documents and rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed TOML or documents, and
    /// [`Error::InvalidRule`] for the first invalid rule.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| Error::InvalidInput(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the file cannot be read, or any
    /// error from [`Self::from_toml`].
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::failed("read_config_file", format!("{}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/docwatch/` on macOS)
    /// 2. XDG config dir (`~/.config/docwatch/` for Unix compatibility)
    ///
    /// Returns default configuration if no file is found. A file that exists
    /// but fails to load is an error rather than a silent fallback.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::load_from_file`].
    pub fn load_default() -> Result<Self> {
        Self::default_paths()
            .into_iter()
            .find(|path| path.exists())
            .map_or_else(|| Ok(Self::default()), |path| Self::load_from_file(&path))
    }

    /// Candidate config file locations, most specific first.
    #[must_use]
    pub fn default_paths() -> Vec<PathBuf> {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Vec::new();
        };
        let platform = base_dirs.config_dir().join("docwatch").join("config.toml");
        let xdg = base_dirs
            .home_dir()
            .join(".config")
            .join("docwatch")
            .join("config.toml");
        if platform == xdg {
            vec![platform]
        } else {
            vec![platform, xdg]
        }
    }

    /// Checks documents and rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty document token or
    /// [`Error::InvalidRule`] for an invalid rule.
    pub fn validate(&self) -> Result<()> {
        for doc in &self.documents {
            if doc.token.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "documents: token must not be empty".to_string(),
                ));
            }
        }
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.doc_token.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "rules[{index}]: doc_token must not be empty"
                )));
            }
            rule.typed()
                .map_err(|e| Error::InvalidRule(format!("rules[{index}]: {}", rule_reason(&e))))?;
        }
        self.rules_engine.utc_offset()?;
        Ok(())
    }

    /// Applies `DOCWATCH_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies `DOCWATCH_*` overrides from `lookup`. Unparseable values are ignored.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(owner) = get("DOCWATCH_OWNER_ID") {
            self.owner_id = Some(owner);
        }
        if let Some(dir) = get("DOCWATCH_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = get("DOCWATCH_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.poller.interval_ms = v;
        }
        if let Some(v) = get("DOCWATCH_MAX_CONCURRENT_POLLS").and_then(|v| v.parse().ok()) {
            self.poller.max_concurrent_polls = v;
        }
        if let Some(v) = get("DOCWATCH_DEBOUNCE_WINDOW_MS").and_then(|v| v.parse().ok()) {
            self.poller.debounce_window_ms = v;
        }
        if let Some(v) = get("DOCWATCH_METRICS_ENABLED").and_then(|v| parse_bool(&v)) {
            self.metrics.enabled = v;
        }
        if let Some(v) = get("DOCWATCH_METRICS_PORT").and_then(|v| v.parse().ok()) {
            self.metrics.port = v;
        }
        if let Some(url) = get("DOCWATCH_SOURCE_URL") {
            self.source.base_url = Some(url);
        }
        if let Some(token) = get("DOCWATCH_SOURCE_TOKEN") {
            self.source.api_token = Some(SecretString::from(token));
        }
        self
    }

    /// Effective owner ID.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        self.owner_id
            .as_deref()
            .filter(|o| !o.trim().is_empty())
            .unwrap_or(DEFAULT_OWNER_ID)
    }

    /// Effective data directory.
    ///
    /// Falls back to the platform data dir, then `./.docwatch`.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "docwatch").map_or_else(
                || PathBuf::from(".docwatch"),
                |dirs| dirs.data_dir().to_path_buf(),
            )
        })
    }

    /// Path of the `SQLite` database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(DATABASE_FILE)
    }
}

fn rule_reason(error: &Error) -> String {
    match error {
        Error::InvalidRule(reason) | Error::InvalidInput(reason) => reason.clone(),
        other => other.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::LogFormat;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
owner_id = "ou_1"
data_dir = "/var/lib/docwatch"

[poller]
interval_ms = 30000
max_concurrent_polls = 2

[snapshots]
retention_days = 7

[rules_engine]
async_mode = false
utc_offset_minutes = 480

[source]
base_url = "https://docs.example.com/api"
api_token = "s3cret"

[notify]
endpoint = "https://chat.example.com/messages"

[logging]
format = "json"

[metrics]
enabled = true
port = 9191

[[documents]]
token = "doc1"
notify_target = "oc_team"

[[documents]]
token = "sheet1"
doc_type = "sheet"

[[rules]]
doc_token = "doc1"
name = "Alice edits"
condition = { type = "modified_by_user", value = "ou_alice" }
action = { type = "notify", target = "oc_alerts" }

[[rules]]
doc_token = "doc1"
condition = { type = "time_range", value = "22-6" }
action = { type = "create_task", template = "Night edit on {title}" }
"#;

    #[test]
    fn test_full_config_parses() {
        let config = DocwatchConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.owner_id(), "ou_1");
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/docwatch/docwatch.db"));

        let options = config.poller.options();
        assert_eq!(options.interval_ms, 30_000);
        assert_eq!(options.max_concurrent_polls, 2);
        assert_eq!(options.max_retries, DEFAULT_MAX_RETRIES);

        assert_eq!(config.snapshots.policy().retention_days, 7);
        assert!(!config.rules_engine.queue_options().async_mode);
        assert_eq!(
            config.rules_engine.utc_offset().unwrap().unwrap().local_minus_utc(),
            8 * 3600
        );
        assert_eq!(
            config.source.api_token.as_ref().unwrap().expose_secret(),
            "s3cret"
        );
        assert!(config.tasks.endpoint.is_none());
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.metrics.port, 9191);

        assert_eq!(config.documents.len(), 2);
        assert_eq!(config.documents[0].doc_type, DocType::Docx);
        assert_eq!(config.documents[1].doc_type, DocType::Sheet);
        assert_eq!(config.rules.len(), 2);
        let (condition, _) = config.rules[1].typed().unwrap();
        assert_eq!(condition.kind(), "time_range");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DocwatchConfig::from_toml("").unwrap();
        assert_eq!(config.owner_id(), DEFAULT_OWNER_ID);
        assert_eq!(config.poller.options(), PollerOptions::default());
        assert_eq!(config.rules_engine.queue_options(), RuleQueueOptions::default());
        assert_eq!(config.snapshots.policy(), SnapshotPolicy::default());
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_invalid_rule_is_rejected_with_reason() {
        let err = DocwatchConfig::from_toml(
            r#"
[[rules]]
doc_token = "doc1"
condition = { type = "any" }
action = { type = "notify" }
"#,
        )
        .unwrap_err();
        match err {
            Error::InvalidRule(reason) => {
                assert_eq!(reason, "rules[0]: notify action requires a target");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_toml_is_invalid_input() {
        assert!(matches!(
            DocwatchConfig::from_toml("[poller\ninterval_ms = 1"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            DocwatchConfig::from_toml("[[documents]]\ntoken = \"\""),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DOCWATCH_OWNER_ID", "ou_env"),
            ("DOCWATCH_POLL_INTERVAL_MS", "1500"),
            ("DOCWATCH_MAX_CONCURRENT_POLLS", "not-a-number"),
            ("DOCWATCH_METRICS_ENABLED", "yes"),
            ("DOCWATCH_SOURCE_TOKEN", "tok"),
        ]
        .into_iter()
        .collect();

        let config = DocwatchConfig::from_toml(SAMPLE)
            .unwrap()
            .with_overrides_from(|key| env.get(key).map(ToString::to_string));
        assert_eq!(config.owner_id(), "ou_env");
        assert_eq!(config.poller.interval_ms, 1_500);
        assert_eq!(config.poller.max_concurrent_polls, 2);
        assert!(config.metrics.enabled);
        assert_eq!(
            config.source.api_token.as_ref().unwrap().expose_secret(),
            "tok"
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = DocwatchConfig::load_from_file(&path).unwrap();
        assert_eq!(config.documents.len(), 2);

        assert!(matches!(
            DocwatchConfig::load_from_file(&dir.path().join("missing.toml")),
            Err(Error::OperationFailed { .. })
        ));
    }
}
