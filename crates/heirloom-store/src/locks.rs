//! Per-plan advisory locks.
//!
//! Lock rows are data, not live memory: a row holds the holder identity
//! and an expiry timestamp, so a crashed worker cannot leave a plan stuck
//! forever. Acquisition succeeds iff no row exists or the existing row
//! has expired, all in one guarded upsert.

use crate::StoreResult;
use rusqlite::{params, Connection};

/// RAII guard for an acquired plan lock. Releases on drop, so every exit
/// path (including unwinding) gives the lock back; an expired lock is
/// reclaimed by the next acquirer even if the drop never ran.
pub struct PlanLock<'c> {
    conn: &'c Connection,
    plan_id: i64,
    holder: String,
    released: bool,
}

impl<'c> PlanLock<'c> {
    pub fn plan_id(&self) -> i64 {
        self.plan_id
    }

    /// Release explicitly. Equivalent to dropping, but surfaces errors.
    pub fn release(mut self) -> StoreResult<()> {
        self.released = true;
        release_plan_lock(self.conn, self.plan_id, &self.holder)?;
        Ok(())
    }
}

impl Drop for PlanLock<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = release_plan_lock(self.conn, self.plan_id, &self.holder) {
                log::warn!("failed to release lock on plan {}: {}", self.plan_id, e);
            }
        }
    }
}

/// Try to acquire the lock on a plan until `now + ttl_secs`.
///
/// Returns `None` if another holder has an unexpired lock. Re-acquiring
/// with the same holder extends the expiry.
pub fn acquire_plan_lock<'c>(
    conn: &'c Connection,
    plan_id: i64,
    holder: &str,
    now: i64,
    ttl_secs: i64,
) -> StoreResult<Option<PlanLock<'c>>> {
    let affected = conn.execute(
        "INSERT INTO plan_locks (plan_id, holder, locked_until) VALUES (?1, ?2, ?3)
         ON CONFLICT(plan_id) DO UPDATE
             SET holder = excluded.holder, locked_until = excluded.locked_until
             WHERE plan_locks.locked_until <= ?4 OR plan_locks.holder = excluded.holder",
        params![plan_id, holder, now + ttl_secs, now],
    )?;

    if affected > 0 {
        Ok(Some(PlanLock {
            conn,
            plan_id,
            holder: holder.to_string(),
            released: false,
        }))
    } else {
        Ok(None)
    }
}

fn release_plan_lock(conn: &Connection, plan_id: i64, holder: &str) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM plan_locks WHERE plan_id = ?1 AND holder = ?2",
        params![plan_id, holder],
    )?;
    Ok(())
}
