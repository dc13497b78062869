//! `SQLite` store implementing every storage trait.
//!
//! One database file holds tracked documents, snapshots, rules, and change
//! events, each table keyed by `owner_id`.
//!
//! ## Module Structure
//!
//! - [`connection`]: lock acquisition with poison recovery, pragma setup
//! - [`rows`]: row-to-model conversion
//! - [`metrics`]: per-operation counters and latency histograms

mod connection;
mod metrics;
mod rows;

pub use connection::configure_connection;
pub use metrics::record_operation_metrics;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use rusqlite::{Connection, OptionalExtension, params};

use self::rows::{
    EVENT_COLUMNS, RULE_COLUMNS, SNAPSHOT_COLUMNS, TRACKED_COLUMNS, event_from_row, rule_from_row,
    snapshot_from_row, tracked_from_row,
};
use super::traits::{ChangeEventStore, RuleStore, SnapshotStore, StoreHealth, TrackedDocumentStore};
use crate::models::{ChangeEvent, ChangeRule, DocumentSnapshot, TrackedDocument};
use crate::sync::acquire_lock;
use crate::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tracked_documents (
    owner_id TEXT NOT NULL,
    doc_token TEXT NOT NULL,
    doc_type TEXT NOT NULL,
    notify_target TEXT NOT NULL,
    last_known_user TEXT,
    last_known_modified_time INTEGER,
    last_notification_time INTEGER,
    PRIMARY KEY (owner_id, doc_token)
);

CREATE TABLE IF NOT EXISTS document_snapshots (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    doc_token TEXT NOT NULL,
    doc_type TEXT NOT NULL,
    revision_number INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    compressed_content BLOB NOT NULL,
    content_size INTEGER NOT NULL,
    compression_ratio REAL NOT NULL,
    modified_by TEXT NOT NULL,
    modified_at INTEGER NOT NULL,
    stored_at INTEGER NOT NULL,
    is_latest INTEGER NOT NULL DEFAULT 0,
    UNIQUE (owner_id, doc_token, revision_number)
);

CREATE INDEX IF NOT EXISTS idx_document_snapshots_latest
    ON document_snapshots(owner_id, doc_token, is_latest);

CREATE TABLE IF NOT EXISTS change_rules (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    doc_token TEXT NOT NULL,
    name TEXT NOT NULL,
    condition TEXT NOT NULL,
    action TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_rules_doc
    ON change_rules(owner_id, doc_token);

CREATE TABLE IF NOT EXISTS change_events (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    doc_token TEXT NOT NULL,
    previous_modified_user TEXT,
    previous_modified_time INTEGER,
    new_modified_user TEXT,
    new_modified_time INTEGER,
    change_type TEXT NOT NULL,
    change_detected_at INTEGER NOT NULL,
    debounced INTEGER NOT NULL DEFAULT 0,
    notification_sent INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT 'null'
);

CREATE INDEX IF NOT EXISTS idx_change_events_recent
    ON change_events(owner_id, change_detected_at DESC);
";

/// `SQLite`-backed store.
pub struct SqliteStore {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the `SQLite` database.
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the `SQLite` database file
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::failed("create_store_dir", e))?;
        }

        let conn = Connection::open(&db_path).map_err(|e| Error::failed("open_store_db", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::failed("open_store_db_memory", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the default database path: `<data_local_dir>/docwatch/docwatch.db`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|d| {
            d.data_local_dir()
                .join("docwatch")
                .join("docwatch.db")
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        configure_connection(&conn);
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::failed("create_store_schema", e))
    }

    /// Runs `f` under the connection lock, recording metrics and mapping errors.
    fn with_conn<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let mut conn = acquire_lock(&self.conn);
        let result = f(&mut conn);
        record_operation_metrics(operation, start, result.is_ok());
        result.map_err(|e| Error::failed(operation, e))
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

fn to_json<T: serde::Serialize>(operation: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::failed(operation, e))
}

fn limit_param(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

impl StoreHealth for SqliteStore {
    fn health_check(&self) -> bool {
        self.with_conn("health_check", |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        })
        .is_ok()
    }
}

impl TrackedDocumentStore for SqliteStore {
    fn upsert_tracked(&self, owner_id: &str, doc: &TrackedDocument) -> Result<()> {
        self.with_conn("upsert_tracked", |conn| {
            conn.execute(
                "INSERT INTO tracked_documents
                 (owner_id, doc_token, doc_type, notify_target, last_known_user,
                  last_known_modified_time, last_notification_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(owner_id, doc_token) DO UPDATE SET
                    doc_type = excluded.doc_type,
                    notify_target = excluded.notify_target,
                    last_known_user = excluded.last_known_user,
                    last_known_modified_time = excluded.last_known_modified_time,
                    last_notification_time = excluded.last_notification_time",
                params![
                    owner_id,
                    doc.doc_token,
                    doc.doc_type.as_str(),
                    doc.notify_target,
                    doc.last_known_user,
                    doc.last_known_modified_time,
                    doc.last_notification_time,
                ],
            )
            .map(|_| ())
        })
    }

    fn remove_tracked(&self, owner_id: &str, doc_token: &str) -> Result<bool> {
        self.with_conn("remove_tracked", |conn| {
            conn.execute(
                "DELETE FROM tracked_documents WHERE owner_id = ?1 AND doc_token = ?2",
                params![owner_id, doc_token],
            )
            .map(|n| n > 0)
        })
    }

    fn list_tracked(&self, owner_id: &str) -> Result<Vec<TrackedDocument>> {
        self.with_conn("list_tracked", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRACKED_COLUMNS} FROM tracked_documents
                 WHERE owner_id = ?1 ORDER BY doc_token"
            ))?;
            stmt.query_map(params![owner_id], tracked_from_row)?
                .collect()
        })
    }
}

impl SnapshotStore for SqliteStore {
    fn insert_snapshot(&self, owner_id: &str, snapshot: &DocumentSnapshot) -> Result<bool> {
        self.with_conn("insert_snapshot", |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM document_snapshots
                 WHERE owner_id = ?1 AND doc_token = ?2 AND revision_number = ?3)",
                params![owner_id, snapshot.doc_token, snapshot.revision_number],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(false);
            }

            tx.execute(
                "UPDATE document_snapshots SET is_latest = 0
                 WHERE owner_id = ?1 AND doc_token = ?2 AND is_latest = 1",
                params![owner_id, snapshot.doc_token],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO document_snapshots (owner_id, {SNAPSHOT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1)"
                ),
                params![
                    owner_id,
                    snapshot.id,
                    snapshot.doc_token,
                    snapshot.doc_type.as_str(),
                    snapshot.revision_number,
                    snapshot.content_hash,
                    snapshot.compressed_content,
                    i64::try_from(snapshot.content_size).unwrap_or(i64::MAX),
                    snapshot.compression_ratio,
                    snapshot.modified_by,
                    snapshot.modified_at,
                    snapshot.stored_at,
                ],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    fn get_snapshot(
        &self,
        owner_id: &str,
        doc_token: &str,
        revision_number: i64,
    ) -> Result<Option<DocumentSnapshot>> {
        self.with_conn("get_snapshot", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM document_snapshots
                     WHERE owner_id = ?1 AND doc_token = ?2 AND revision_number = ?3"
                ),
                params![owner_id, doc_token, revision_number],
                snapshot_from_row,
            )
            .optional()
        })
    }

    fn latest_snapshot(&self, owner_id: &str, doc_token: &str) -> Result<Option<DocumentSnapshot>> {
        self.with_conn("latest_snapshot", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM document_snapshots
                     WHERE owner_id = ?1 AND doc_token = ?2 AND is_latest = 1"
                ),
                params![owner_id, doc_token],
                snapshot_from_row,
            )
            .optional()
        })
    }

    fn list_snapshots(
        &self,
        owner_id: &str,
        doc_token: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSnapshot>> {
        self.with_conn("list_snapshots", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM document_snapshots
                 WHERE owner_id = ?1 AND doc_token = ?2
                 ORDER BY revision_number DESC LIMIT ?3"
            ))?;
            stmt.query_map(
                params![owner_id, doc_token, limit_param(limit)],
                snapshot_from_row,
            )?
            .collect()
        })
    }

    fn max_revision(&self, owner_id: &str, doc_token: &str) -> Result<Option<i64>> {
        self.with_conn("max_revision", |conn| {
            conn.query_row(
                "SELECT MAX(revision_number) FROM document_snapshots
                 WHERE owner_id = ?1 AND doc_token = ?2",
                params![owner_id, doc_token],
                |row| row.get(0),
            )
        })
    }

    fn snapshot_doc_tokens(&self, owner_id: &str) -> Result<Vec<String>> {
        self.with_conn("snapshot_doc_tokens", |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT doc_token FROM document_snapshots
                 WHERE owner_id = ?1 ORDER BY doc_token",
            )?;
            stmt.query_map(params![owner_id], |row| row.get(0))?
                .collect()
        })
    }

    fn delete_snapshots(&self, owner_id: &str, ids: &[String]) -> Result<usize> {
        self.with_conn("delete_snapshots", |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            for id in ids {
                removed += tx.execute(
                    "DELETE FROM document_snapshots WHERE owner_id = ?1 AND id = ?2",
                    params![owner_id, id],
                )?;
            }
            tx.commit()?;
            Ok(removed)
        })
    }
}

impl RuleStore for SqliteStore {
    fn insert_rule(&self, owner_id: &str, rule: &ChangeRule) -> Result<()> {
        let condition = to_json("serialize_rule_condition", &rule.condition)?;
        let action = to_json("serialize_rule_action", &rule.action)?;
        self.with_conn("insert_rule", |conn| {
            conn.execute(
                &format!("INSERT INTO change_rules (owner_id, {RULE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    owner_id,
                    rule.id,
                    rule.doc_token,
                    rule.name,
                    condition,
                    action,
                    rule.enabled,
                    rule.created_at,
                    rule.updated_at,
                ],
            )
            .map(|_| ())
        })
    }

    fn get_rule(&self, owner_id: &str, rule_id: &str) -> Result<Option<ChangeRule>> {
        self.with_conn("get_rule", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM change_rules WHERE owner_id = ?1 AND id = ?2"
                ),
                params![owner_id, rule_id],
                rule_from_row,
            )
            .optional()
        })
    }

    fn update_rule(&self, owner_id: &str, rule: &ChangeRule) -> Result<bool> {
        let condition = to_json("serialize_rule_condition", &rule.condition)?;
        let action = to_json("serialize_rule_action", &rule.action)?;
        self.with_conn("update_rule", |conn| {
            conn.execute(
                "UPDATE change_rules SET doc_token = ?3, name = ?4, condition = ?5, action = ?6,
                    enabled = ?7, updated_at = ?8
                 WHERE owner_id = ?1 AND id = ?2",
                params![
                    owner_id,
                    rule.id,
                    rule.doc_token,
                    rule.name,
                    condition,
                    action,
                    rule.enabled,
                    rule.updated_at,
                ],
            )
            .map(|n| n > 0)
        })
    }

    fn delete_rule(&self, owner_id: &str, rule_id: &str) -> Result<bool> {
        self.with_conn("delete_rule", |conn| {
            conn.execute(
                "DELETE FROM change_rules WHERE owner_id = ?1 AND id = ?2",
                params![owner_id, rule_id],
            )
            .map(|n| n > 0)
        })
    }

    fn list_rules(&self, owner_id: &str, doc_token: Option<&str>) -> Result<Vec<ChangeRule>> {
        self.with_conn("list_rules", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RULE_COLUMNS} FROM change_rules
                 WHERE owner_id = ?1 AND (?2 IS NULL OR doc_token = ?2)
                 ORDER BY created_at, id"
            ))?;
            stmt.query_map(params![owner_id, doc_token], rule_from_row)?
                .collect()
        })
    }
}

impl ChangeEventStore for SqliteStore {
    fn insert_event(&self, owner_id: &str, event: &ChangeEvent) -> Result<()> {
        let metadata = to_json("serialize_event_metadata", &event.metadata)?;
        self.with_conn("insert_event", |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO change_events (owner_id, {EVENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    owner_id,
                    event.id,
                    event.doc_token,
                    event.previous_modified_user,
                    event.previous_modified_time,
                    event.new_modified_user,
                    event.new_modified_time,
                    event.change_type.as_str(),
                    event.change_detected_at,
                    event.debounced,
                    event.notification_sent,
                    metadata,
                ],
            )
            .map(|_| ())
        })
    }

    fn recent_events(
        &self,
        owner_id: &str,
        doc_token: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>> {
        self.with_conn("recent_events", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM change_events
                 WHERE owner_id = ?1 AND (?2 IS NULL OR doc_token = ?2)
                 ORDER BY change_detected_at DESC, id DESC LIMIT ?3"
            ))?;
            stmt.query_map(
                params![owner_id, doc_token, limit_param(Some(limit))],
                event_from_row,
            )?
            .collect()
        })
    }
}
