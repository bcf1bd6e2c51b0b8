//! Claim verification and completion.
//!
//! Claiming is a two-step protocol. `verify_claim` is read-only: it
//! checks claimability and matches the combined digest, returning the
//! allocation to release. The caller then performs the external transfer
//! and only afterwards calls `complete_claim`, so a share is never
//! marked claimed before funds actually moved.
//!
//! Claimability is computed, never stored:
//! `date reached OR inactivity threshold exceeded`.

use crate::external::ActivityLog;
use crate::proof_of_life::ProofOfLifeConfig;
use crate::{lifecycle, EngineError};
use heirloom_core::claimcode;
use heirloom_store::{plans, AssetType, DistributionMethod, PlanRow, PlanStatus};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

/// A claim attempt as submitted by a beneficiary.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub plan_id: i64,
    pub claim_code: String,
    pub name: String,
    pub email: String,
    pub relationship: String,
}

/// What a verified claim is entitled to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub beneficiary_index: u32,
    pub units: u64,
    pub asset_type: AssetType,
}

/// Public eligibility info for the beneficiary-facing claim page.
/// Deliberately free of PII, digests, and internal failure detail.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimEligibility {
    pub plan_id: i64,
    pub name: String,
    pub asset_type: AssetType,
    pub method: DistributionMethod,
    pub claimable: bool,
    pub fully_claimed: bool,
}

/// Whether the plan's release condition currently holds.
///
/// The date condition is the transfer date for lump-sum plans and the
/// schedule start for periodic ones. On top of that sits the inactivity
/// failsafe: with proof-of-life and early claims enabled, crossing the
/// missed-check-in threshold makes the plan claimable immediately,
/// whatever the calendar says.
pub fn is_plan_claimable(plan: &PlanRow, pol: &ProofOfLifeConfig, now: i64) -> bool {
    if plan.status != PlanStatus::Active {
        return false;
    }

    let date_reached = match plan.method {
        DistributionMethod::LumpSum => plan.transfer_date.is_some_and(|d| d <= now),
        _ => plan.start_date.is_some_and(|d| d <= now),
    };

    let inactivity_exceeded = plan.proof_of_life_enabled
        && plan.early_claim_enabled
        && plan.verification_fail_count >= pol.fail_threshold;

    date_reached || inactivity_exceeded
}

/// Eligibility for the public claim flow.
pub fn eligibility(
    conn: &Connection,
    pol: &ProofOfLifeConfig,
    plan_id: i64,
    now: i64,
) -> Result<ClaimEligibility, EngineError> {
    let plan = plans::plan_get(conn, plan_id)?.ok_or(EngineError::PlanNotFound(plan_id))?;
    Ok(ClaimEligibility {
        plan_id,
        name: plan.name.clone(),
        asset_type: plan.asset_type,
        method: plan.method,
        claimable: is_plan_claimable(&plan, pol, now),
        fully_claimed: plan.is_claimed_fully,
    })
}

/// Verify a claim without mutating anything.
///
/// Matching is all-or-nothing over the combined digest of (name, email,
/// relationship, code); a mismatch in any field yields the same
/// `InvalidClaimCode`, so nothing leaks about which field was wrong.
pub fn verify_claim(
    conn: &Connection,
    pol: &ProofOfLifeConfig,
    request: &ClaimRequest,
    now: i64,
) -> Result<Allocation, EngineError> {
    let plan =
        plans::plan_get(conn, request.plan_id)?.ok_or(EngineError::PlanNotFound(request.plan_id))?;

    if !is_plan_claimable(&plan, pol, now) {
        return Err(EngineError::PlanNotClaimable);
    }

    // A malformed code gets the same generic rejection as a wrong one.
    let digest = claimcode::combined_digest(
        &request.name,
        &request.email,
        &request.relationship,
        &request.claim_code,
    )
    .map_err(|_| EngineError::InvalidClaimCode)?;

    let beneficiary = plans::beneficiary_find_by_combined_hash(conn, request.plan_id, &digest)?
        .ok_or(EngineError::InvalidClaimCode)?;

    if beneficiary.has_claimed {
        return Err(EngineError::AlreadyClaimed);
    }

    Ok(Allocation {
        beneficiary_index: beneficiary.beneficiary_index,
        units: beneficiary.allocated_units,
        asset_type: plan.asset_type,
    })
}

/// Finalize a claim after the external transfer succeeded.
///
/// Idempotent in the failure direction: the unclaimed-to-claimed flip
/// happens at most once, and a second call fails with `AlreadyClaimed`
/// leaving the recorded claim untouched. When the last beneficiary
/// claims, the plan is marked fully claimed and (for lump-sum plans)
/// executed.
pub fn complete_claim(
    conn: &mut Connection,
    activity: &dyn ActivityLog,
    plan_id: i64,
    beneficiary_index: u32,
    claimer_address: &str,
    tx_hash: &str,
    claimed_units: u64,
    now: i64,
) -> Result<(), EngineError> {
    let plan = plans::plan_get(conn, plan_id)?.ok_or(EngineError::PlanNotFound(plan_id))?;
    let beneficiary = plans::beneficiary_get(conn, plan_id, beneficiary_index)?
        .ok_or(EngineError::UnknownBeneficiary)?;

    let tx = conn.transaction().map_err(heirloom_store::StoreError::from)?;

    if !plans::beneficiary_mark_claimed(
        &tx,
        plan_id,
        beneficiary_index,
        claimer_address,
        claimed_units,
        tx_hash,
        now,
    )? {
        return Err(EngineError::AlreadyClaimed);
    }
    plans::escrow_record_release(&tx, plan_id, claimed_units)?;

    let all_claimed = plans::beneficiaries_all_claimed(&tx, plan_id)?;
    if all_claimed {
        plans::plan_mark_claimed_fully(&tx, plan_id)?;
    }
    tx.commit().map_err(heirloom_store::StoreError::from)?;

    activity.record(
        &format!("beneficiary:{beneficiary_index}"),
        "claim_completed",
        &format!(
            "Beneficiary {} claimed {} units of plan {}",
            beneficiary.beneficiary_index, claimed_units, plan_id
        ),
        Some(json!({
            "plan_id": plan_id,
            "beneficiary_index": beneficiary_index,
            "units": claimed_units,
            "tx_hash": tx_hash,
        })),
    );

    if all_claimed && plan.method == DistributionMethod::LumpSum {
        lifecycle::mark_executed(conn, activity, plan_id)?;
    }

    Ok(())
}
