//! Key-value settings.
//!
//! Holds the few operational knobs that must survive restarts and be
//! editable without a deploy, most importantly the creation fee. Any
//! percentage shown by UI code is a display default; this table is the
//! authoritative value the engine computes with.

use crate::StoreResult;
use rusqlite::{params, Connection};

/// Seeded creation fee in basis points (2%), used until an operator sets
/// an explicit `fee_bps` value.
pub const DEFAULT_FEE_BPS: u32 = 200;

const FEE_BPS_KEY: &str = "fee_bps";

/// Get a setting by key.
pub fn settings_get(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
    let mut stmt = conn.prepare_cached("SELECT value FROM settings WHERE key = ?1")?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Set a setting (upsert).
pub fn settings_set(conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// The creation fee in basis points. Falls back to the seeded default
/// when unset or unparseable (a bad manual edit must not block plan
/// creation).
pub fn fee_bps(conn: &Connection) -> StoreResult<u32> {
    match settings_get(conn, FEE_BPS_KEY)? {
        Some(value) => match value.parse::<u32>() {
            Ok(bp) if bp < 10_000 => Ok(bp),
            _ => {
                log::warn!("ignoring invalid fee_bps setting {value:?}, using default");
                Ok(DEFAULT_FEE_BPS)
            }
        },
        None => Ok(DEFAULT_FEE_BPS),
    }
}
