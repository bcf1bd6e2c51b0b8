//! Distribution period persistence.
//!
//! The full period set is materialized when the plan is created, so the
//! scheduler only ever updates status on existing rows. Period numbers
//! are 1-based and the scheduler always works on the lowest open one,
//! which is what keeps per-plan execution strictly ordered.

use crate::model::{DistributionMethod, DistributionRow, DistributionStatus};
use crate::{StoreError, StoreResult};
use chrono::{DateTime, Months, Utc};
use heirloom_core::{split_evenly, validate_periodic_percentage};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// A period computed at plan creation, before insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedPeriod {
    pub period_number: u32,
    pub units: u64,
    pub scheduled_date: i64,
}

/// Compute the full period set for a periodic plan.
///
/// `100 / percent` periods, stepped by the method's calendar interval
/// from `start_date`, equal amounts with the rounding remainder folded
/// into the final period so the amounts sum exactly to `net_units`.
pub fn materialize_periods(
    net_units: u64,
    percent: u8,
    method: DistributionMethod,
    start_date: i64,
) -> StoreResult<Vec<MaterializedPeriod>> {
    let period_count = validate_periodic_percentage(percent)?;
    let months = method.period_months().ok_or_else(|| {
        StoreError::InvalidSchedule("lump-sum plans have no periods".into())
    })?;

    let start = DateTime::<Utc>::from_timestamp(start_date, 0)
        .ok_or_else(|| StoreError::InvalidSchedule("start date out of range".into()))?;

    let amounts = split_evenly(net_units, period_count);
    let mut periods = Vec::with_capacity(period_count as usize);
    for (i, &units) in amounts.iter().enumerate() {
        let scheduled = start
            .checked_add_months(Months::new(months * i as u32))
            .ok_or_else(|| StoreError::InvalidSchedule("schedule extends out of range".into()))?;
        periods.push(MaterializedPeriod {
            period_number: i as u32 + 1,
            units,
            scheduled_date: scheduled.timestamp(),
        });
    }
    Ok(periods)
}

const DISTRIBUTION_COLUMNS: &str =
    "plan_id, period_number, units, scheduled_date, status, executed_at, tx_hash, attempts";

fn distribution_from_row(row: &Row) -> rusqlite::Result<DistributionRow> {
    Ok(DistributionRow {
        plan_id: row.get(0)?,
        period_number: row.get(1)?,
        units: row.get(2)?,
        scheduled_date: row.get(3)?,
        status: row.get(4)?,
        executed_at: row.get(5)?,
        tx_hash: row.get(6)?,
        attempts: row.get(7)?,
    })
}

/// All periods of a plan in period order.
pub fn distributions_for_plan(conn: &Connection, plan_id: i64) -> StoreResult<Vec<DistributionRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {DISTRIBUTION_COLUMNS} FROM distributions
         WHERE plan_id = ?1 ORDER BY period_number"
    ))?;
    let rows = stmt.query_map(params![plan_id], distribution_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// The lowest-numbered period that is still open (pending or notified).
/// The scheduler must never act on any other period of the plan, even if
/// a later period's date has also passed.
pub fn next_open_distribution(
    conn: &Connection,
    plan_id: i64,
) -> StoreResult<Option<DistributionRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {DISTRIBUTION_COLUMNS} FROM distributions
         WHERE plan_id = ?1 AND status IN ('pending', 'notified')
         ORDER BY period_number LIMIT 1"
    ))?;
    Ok(stmt
        .query_row(params![plan_id], distribution_from_row)
        .optional()?)
}

/// Count periods that are not yet in a terminal state.
pub fn open_distribution_count(conn: &Connection, plan_id: i64) -> StoreResult<u32> {
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(*) FROM distributions
         WHERE plan_id = ?1 AND status IN ('pending', 'notified')",
    )?;
    Ok(stmt.query_row(params![plan_id], |row| row.get(0))?)
}

/// Mark a period executed. Guarded on the period still being open, so a
/// racing duplicate execution changes nothing and returns false.
pub fn distribution_mark_executed(
    conn: &Connection,
    plan_id: i64,
    period_number: u32,
    tx_hash: &str,
    now: i64,
) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE distributions SET status = 'executed', executed_at = ?3, tx_hash = ?4
         WHERE plan_id = ?1 AND period_number = ?2 AND status IN ('pending', 'notified')",
        params![plan_id, period_number, now, tx_hash],
    )?;
    Ok(affected > 0)
}

/// Move a pending period to notified (beneficiaries told it is coming).
pub fn distribution_mark_notified(
    conn: &Connection,
    plan_id: i64,
    period_number: u32,
) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE distributions SET status = 'notified'
         WHERE plan_id = ?1 AND period_number = ?2 AND status = 'pending'",
        params![plan_id, period_number],
    )?;
    Ok(affected > 0)
}

/// Record a failed execution attempt and return the new attempt count.
pub fn distribution_record_attempt(
    conn: &Connection,
    plan_id: i64,
    period_number: u32,
) -> StoreResult<u32> {
    conn.execute(
        "UPDATE distributions SET attempts = attempts + 1
         WHERE plan_id = ?1 AND period_number = ?2",
        params![plan_id, period_number],
    )?;
    let mut stmt = conn.prepare_cached(
        "SELECT attempts FROM distributions WHERE plan_id = ?1 AND period_number = ?2",
    )?;
    Ok(stmt.query_row(params![plan_id, period_number], |row| row.get(0))?)
}

/// Mark a period failed after the attempt ceiling is reached. Terminal.
pub fn distribution_mark_failed(
    conn: &Connection,
    plan_id: i64,
    period_number: u32,
) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE distributions SET status = 'failed'
         WHERE plan_id = ?1 AND period_number = ?2 AND status IN ('pending', 'notified')",
        params![plan_id, period_number],
    )?;
    Ok(affected > 0)
}

/// Cancel every open period of a plan (plan cancellation).
pub fn distributions_cancel_open(conn: &Connection, plan_id: i64) -> StoreResult<u32> {
    let affected = conn.execute(
        "UPDATE distributions SET status = 'cancelled'
         WHERE plan_id = ?1 AND status IN ('pending', 'notified')",
        params![plan_id],
    )?;
    Ok(affected as u32)
}
