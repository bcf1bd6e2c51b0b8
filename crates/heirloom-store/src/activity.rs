//! Append-only activity log.
//!
//! Every lifecycle transition, scheduler execution, claim completion,
//! and operator alert lands here with the actor, a kind tag, and
//! optional JSON metadata. Rows are never updated or deleted; plans are
//! terminal-marked rather than removed so this history stays auditable.

use crate::StoreResult;
use rusqlite::{params, Connection};

/// A recorded activity entry.
#[derive(Debug, Clone)]
pub struct ActivityRow {
    pub id: i64,
    pub at: i64,
    pub actor: String,
    pub kind: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}

/// Append an entry.
pub fn activity_insert(
    conn: &Connection,
    at: i64,
    actor: &str,
    kind: &str,
    description: &str,
    metadata: Option<&serde_json::Value>,
) -> StoreResult<()> {
    let metadata_text = metadata.map(|m| m.to_string());
    conn.execute(
        "INSERT INTO activity_log (at, actor, kind, description, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![at, actor, kind, description, metadata_text],
    )?;
    Ok(())
}

/// List entries, most recent first.
pub fn activity_list(conn: &Connection, limit: u32) -> StoreResult<Vec<ActivityRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, at, actor, kind, description, metadata
         FROM activity_log ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        let metadata_text: Option<String> = row.get(5)?;
        Ok(ActivityRow {
            id: row.get(0)?,
            at: row.get(1)?,
            actor: row.get(2)?,
            kind: row.get(3)?,
            description: row.get(4)?,
            metadata: metadata_text.and_then(|t| serde_json::from_str(&t).ok()),
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_conn;

    #[test]
    fn test_append_and_list() {
        let conn = test_conn();

        activity_insert(&conn, 1000, "owner:1", "plan_paused", "Plan 1 paused", None).unwrap();
        let meta = serde_json::json!({ "plan_id": 1, "period": 2 });
        activity_insert(
            &conn,
            2000,
            "scheduler",
            "distribution_executed",
            "Period 2 of plan 1 executed",
            Some(&meta),
        )
        .unwrap();

        let entries = activity_list(&conn, 10).unwrap();
        assert_eq!(entries.len(), 2);
        // Most recent first
        assert_eq!(entries[0].kind, "distribution_executed");
        assert_eq!(entries[0].metadata.as_ref().unwrap()["period"], 2);
        assert_eq!(entries[1].actor, "owner:1");
        assert!(entries[1].metadata.is_none());
    }

    #[test]
    fn test_limit() {
        let conn = test_conn();
        for i in 0..5 {
            activity_insert(&conn, i, "test", "k", "d", None).unwrap();
        }
        assert_eq!(activity_list(&conn, 3).unwrap().len(), 3);
    }
}
