//! Store-backed activity log.
//!
//! Implements the engine's `ActivityLog` trait over the `activity_log`
//! table, on its own connection so recording never contends with the
//! scheduler's statements. Recording failures are logged and swallowed;
//! an audit write must never fail the operation it documents.

use heirloom_engine::ActivityLog;
use heirloom_store::{activity_insert, StoreResult};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteActivityLog {
    conn: Mutex<Connection>,
}

impl SqliteActivityLog {
    /// Open a dedicated connection to the engine database.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        let conn = heirloom_store::open_db(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Wrap an existing connection (tests, in-memory runs).
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl ActivityLog for SqliteActivityLog {
    fn record(
        &self,
        actor: &str,
        kind: &str,
        description: &str,
        metadata: Option<serde_json::Value>,
    ) {
        let now = chrono::Utc::now().timestamp();
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = activity_insert(&conn, now, actor, kind, description, metadata.as_ref()) {
            log::error!("failed to record activity {kind} ({description}): {e}");
        }
    }
}
