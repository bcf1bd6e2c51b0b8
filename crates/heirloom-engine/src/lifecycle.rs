//! The plan lifecycle state machine.
//!
//! ```text
//! ACTIVE <-> PAUSED
//!   ACTIVE | PAUSED -> CANCELLED   (owner, refunds escrow, no claims yet)
//!   ACTIVE          -> EXPIRED     (scheduler sweep, time-based)
//!   ACTIVE          -> EXECUTED    (system only, terminal condition met)
//! ```
//!
//! Transitions are compare-and-set updates, so a transition that loses a
//! race changes nothing and reports the actual current state. Every
//! successful transition appends an activity entry with the actor and
//! the old/new state.

use crate::external::{call_with_timeout, ActivityLog, EngineContext};
use crate::EngineError;
use heirloom_store::{distributions, plans, PlanStatus};
use rusqlite::Connection;
use serde_json::json;
use std::time::Duration;

/// Actor string for transitions the engine makes on its own.
pub const SYSTEM_ACTOR: &str = "system";

fn record_transition(
    activity: &dyn ActivityLog,
    actor: &str,
    plan_id: i64,
    from: PlanStatus,
    to: PlanStatus,
) {
    activity.record(
        actor,
        "plan_status_changed",
        &format!("Plan {plan_id} moved from {from} to {to}"),
        Some(json!({ "plan_id": plan_id, "from": from.as_str(), "to": to.as_str() })),
    );
}

/// Pause an active plan. The scheduler skips paused plans entirely.
pub fn pause(
    conn: &Connection,
    activity: &dyn ActivityLog,
    plan_id: i64,
    actor: &str,
) -> Result<(), EngineError> {
    let plan = plans::plan_get(conn, plan_id)?.ok_or(EngineError::PlanNotFound(plan_id))?;

    if !plans::plan_update_status(conn, plan_id, &[PlanStatus::Active], PlanStatus::Paused)? {
        return Err(EngineError::InvalidState {
            current: plans::plan_require(conn, plan_id)?.status,
        });
    }

    record_transition(activity, actor, plan_id, plan.status, PlanStatus::Paused);
    Ok(())
}

/// Resume a paused plan.
pub fn resume(
    conn: &Connection,
    activity: &dyn ActivityLog,
    plan_id: i64,
    actor: &str,
) -> Result<(), EngineError> {
    let plan = plans::plan_get(conn, plan_id)?.ok_or(EngineError::PlanNotFound(plan_id))?;

    if !plans::plan_update_status(conn, plan_id, &[PlanStatus::Paused], PlanStatus::Active)? {
        return Err(EngineError::InvalidState {
            current: plans::plan_require(conn, plan_id)?.status,
        });
    }

    record_transition(activity, actor, plan_id, plan.status, PlanStatus::Active);
    Ok(())
}

/// Cancel a plan and refund its escrow to the owner.
///
/// Legal from ACTIVE or PAUSED, and only while no beneficiary has
/// claimed. The ledger refund runs first; the store is mirrored only
/// after the refund succeeded, so a ledger failure leaves the plan in
/// its prior, fully valid state. Returns the refund transaction hash.
pub async fn cancel(
    conn: &mut Connection,
    ctx: &EngineContext<'_>,
    plan_id: i64,
    actor: &str,
    now: i64,
    call_timeout: Duration,
) -> Result<String, EngineError> {
    let plan = plans::plan_get(conn, plan_id)?.ok_or(EngineError::PlanNotFound(plan_id))?;

    if !matches!(plan.status, PlanStatus::Active | PlanStatus::Paused) {
        return Err(EngineError::InvalidState {
            current: plan.status,
        });
    }
    if plans::beneficiaries_any_claimed(conn, plan_id)? {
        return Err(EngineError::PartialClaimExists);
    }

    // Write-ahead on the ledger, then mirror.
    let tx_hash = call_with_timeout(call_timeout, ctx.ledger.refund_escrow(plan_id)).await?;

    let tx = conn.transaction().map_err(heirloom_store::StoreError::from)?;
    if !plans::plan_update_status(
        &tx,
        plan_id,
        &[PlanStatus::Active, PlanStatus::Paused],
        PlanStatus::Cancelled,
    )? {
        // The refund already happened on-chain; surface the conflict
        // loudly instead of silently double-transitioning.
        let current = plans::plan_require(&tx, plan_id)?.status;
        log::error!(
            "plan {plan_id} refunded on-chain ({tx_hash}) but moved to {current} concurrently"
        );
        return Err(EngineError::InvalidState { current });
    }
    distributions::distributions_cancel_open(&tx, plan_id)?;
    plans::escrow_mark_refunded(&tx, plan_id, now)?;
    tx.commit().map_err(heirloom_store::StoreError::from)?;

    record_transition(ctx.activity, actor, plan_id, plan.status, PlanStatus::Cancelled);
    ctx.activity.record(
        actor,
        "escrow_refunded",
        &format!("Escrow for plan {plan_id} refunded to owner"),
        Some(json!({ "plan_id": plan_id, "tx_hash": tx_hash })),
    );

    Ok(tx_hash)
}

/// Mark a plan executed once its terminal condition holds. System-only.
///
/// Idempotent: returns `Ok(false)` when the plan is already executed,
/// and errors only if the plan sits in a state that can never execute.
pub fn mark_executed(
    conn: &Connection,
    activity: &dyn ActivityLog,
    plan_id: i64,
) -> Result<bool, EngineError> {
    let plan = plans::plan_get(conn, plan_id)?.ok_or(EngineError::PlanNotFound(plan_id))?;

    if plan.status == PlanStatus::Executed {
        return Ok(false);
    }

    if !plans::plan_update_status(conn, plan_id, &[PlanStatus::Active], PlanStatus::Executed)? {
        let current = plans::plan_require(conn, plan_id)?.status;
        if current == PlanStatus::Executed {
            return Ok(false);
        }
        return Err(EngineError::InvalidState { current });
    }

    record_transition(activity, SYSTEM_ACTOR, plan_id, plan.status, PlanStatus::Executed);
    Ok(true)
}

/// Mark a plan expired (scheduler sweep). Idempotent like `mark_executed`.
pub fn mark_expired(
    conn: &Connection,
    activity: &dyn ActivityLog,
    plan_id: i64,
) -> Result<bool, EngineError> {
    let plan = plans::plan_get(conn, plan_id)?.ok_or(EngineError::PlanNotFound(plan_id))?;

    if plan.status == PlanStatus::Expired {
        return Ok(false);
    }

    if !plans::plan_update_status(conn, plan_id, &[PlanStatus::Active], PlanStatus::Expired)? {
        let current = plans::plan_require(conn, plan_id)?.status;
        if current == PlanStatus::Expired {
            return Ok(false);
        }
        return Err(EngineError::InvalidState { current });
    }

    record_transition(activity, SYSTEM_ACTOR, plan_id, plan.status, PlanStatus::Expired);
    Ok(true)
}
