//! Shared connection handling for the `SQLite` store.

use rusqlite::Connection;

/// Applies WAL journaling, `NORMAL` sync, and a 5 second busy timeout.
///
/// Pragma results are ignored; `journal_mode` answers with a row that
/// `execute_batch` would reject, and in-memory databases refuse WAL.
pub fn configure_connection(conn: &Connection) {
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    let _ = conn.pragma_update(None, "foreign_keys", "ON");
}
