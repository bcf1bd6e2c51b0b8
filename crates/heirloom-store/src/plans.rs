//! Plan, beneficiary, and escrow persistence.
//!
//! `create_plan` is the write boundary for the data-model invariants:
//! allocations must sum to 10000 bp, periodic percentages must divide
//! 100, the full period set is materialized up front, and everything
//! lands in a single transaction. A failed creation writes nothing.

use crate::distributions::materialize_periods;
use crate::model::*;
use crate::settings;
use crate::{StoreError, StoreResult};
use heirloom_core::{
    claimcode, split_by_allocation, validate_percentages, CipherKey, TOTAL_ALLOCATION_BP,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const PLAN_COLUMNS: &str = "id, chain_plan_id, owner_plan_id, tx_hash, owner_email, name, \
     description, asset_type, total_display, total_units, method, periodic_percent, \
     transfer_date, start_date, end_date, proof_of_life_enabled, early_claim_enabled, \
     verification_token, last_verification_sent, last_verification_at, \
     verification_fail_count, claim_codes_sent_at, status, is_claimed_fully, created_at";

fn plan_from_row(row: &Row) -> rusqlite::Result<PlanRow> {
    Ok(PlanRow {
        id: row.get(0)?,
        chain_plan_id: row.get(1)?,
        owner_plan_id: row.get(2)?,
        tx_hash: row.get(3)?,
        owner_email: row.get(4)?,
        name: row.get(5)?,
        description: row.get(6)?,
        asset_type: row.get(7)?,
        total_display: row.get(8)?,
        total_units: row.get(9)?,
        method: row.get(10)?,
        periodic_percent: row.get(11)?,
        transfer_date: row.get(12)?,
        start_date: row.get(13)?,
        end_date: row.get(14)?,
        proof_of_life_enabled: row.get(15)?,
        early_claim_enabled: row.get(16)?,
        verification_token: row.get(17)?,
        last_verification_sent: row.get(18)?,
        last_verification_at: row.get(19)?,
        verification_fail_count: row.get(20)?,
        claim_codes_sent_at: row.get(21)?,
        status: row.get(22)?,
        is_claimed_fully: row.get(23)?,
        created_at: row.get(24)?,
    })
}

const BENEFICIARY_COLUMNS: &str = "plan_id, beneficiary_index, name, email, relationship, \
     name_hash, email_hash, relationship_hash, combined_hash, claim_code_cipher, \
     claim_code_hash, allocation_bp, allocated_units, has_claimed, claimed_at, \
     claimed_by_address, claimed_units, claim_tx_hash";

fn beneficiary_from_row(row: &Row) -> rusqlite::Result<BeneficiaryRow> {
    Ok(BeneficiaryRow {
        plan_id: row.get(0)?,
        beneficiary_index: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        relationship: row.get(4)?,
        name_hash: row.get(5)?,
        email_hash: row.get(6)?,
        relationship_hash: row.get(7)?,
        combined_hash: row.get(8)?,
        claim_code_cipher: row.get(9)?,
        claim_code_hash: row.get(10)?,
        allocation_bp: row.get(11)?,
        allocated_units: row.get(12)?,
        has_claimed: row.get(13)?,
        claimed_at: row.get(14)?,
        claimed_by_address: row.get(15)?,
        claimed_units: row.get(16)?,
        claim_tx_hash: row.get(17)?,
    })
}

/// Create a plan with its beneficiaries, escrow record, and (for periodic
/// schedules) the fully materialized period set. All-or-nothing.
///
/// The creation fee comes from the persisted `fee_bps` setting; the net
/// amount after the fee is what gets escrowed and distributed. Returns
/// the new plan id.
pub fn create_plan(
    conn: &mut Connection,
    cipher: &CipherKey,
    plan: &NewPlan,
    beneficiaries: &[NewBeneficiary],
    now: i64,
) -> StoreResult<i64> {
    let allocations: Vec<u32> = beneficiaries.iter().map(|b| b.allocation_bp).collect();
    validate_percentages(&allocations)?;

    if plan.total_units == 0 {
        return Err(StoreError::InvalidAmount("total amount must be > 0".into()));
    }

    let fee_bp = settings::fee_bps(conn)?;
    let fee_units = (u128::from(plan.total_units) * u128::from(fee_bp)
        / u128::from(TOTAL_ALLOCATION_BP)) as u64;
    let net_units = plan
        .total_units
        .checked_sub(fee_units)
        .filter(|&n| n > 0)
        .ok_or_else(|| StoreError::InvalidAmount("amount is consumed by the fee".into()))?;

    // Resolve the schedule before touching the database
    let (method, periodic_percent, transfer_date, start_date, end_date, periods) =
        match plan.schedule {
            Schedule::LumpSum { transfer_date } => {
                (DistributionMethod::LumpSum, None, Some(transfer_date), None, None, Vec::new())
            }
            Schedule::Periodic {
                method,
                percent,
                start_date,
            } => {
                if method.period_months().is_none() {
                    return Err(StoreError::InvalidSchedule(
                        "periodic schedule cannot use the lump-sum method".into(),
                    ));
                }
                let periods = materialize_periods(net_units, percent, method, start_date)?;
                let end_date = periods.last().map(|p| p.scheduled_date);
                (method, Some(percent), None, Some(start_date), end_date, periods)
            }
        };

    // Hash and encrypt beneficiary material before opening the transaction
    let shares = split_by_allocation(net_units, &allocations);
    let mut prepared = Vec::with_capacity(beneficiaries.len());
    for (input, &units) in beneficiaries.iter().zip(shares.iter()) {
        let code = claimcode::normalize_code(&input.claim_code)?;
        prepared.push((
            claimcode::field_digest(&input.name),
            claimcode::field_digest(&input.email),
            claimcode::field_digest(&input.relationship),
            claimcode::combined_digest(
                &input.name,
                &input.email,
                &input.relationship,
                &code,
            )?,
            cipher.encrypt(&code)?,
            claimcode::code_digest(&code)?,
            units,
        ));
    }

    let release_conditions: u32 =
        1 + u32::from(plan.proof_of_life_enabled && plan.early_claim_enabled);

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO plans (
            chain_plan_id, owner_plan_id, tx_hash, owner_email, name, description,
            asset_type, total_display, total_units, method, periodic_percent,
            transfer_date, start_date, end_date, proof_of_life_enabled,
            early_claim_enabled, status, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            plan.chain_plan_id,
            plan.owner_plan_id,
            plan.tx_hash,
            plan.owner_email,
            plan.name,
            plan.description,
            plan.asset_type,
            plan.total_display,
            net_units,
            method,
            periodic_percent,
            transfer_date,
            start_date,
            end_date,
            plan.proof_of_life_enabled,
            plan.early_claim_enabled,
            PlanStatus::Active,
            now,
        ],
    )?;
    let plan_id = tx.last_insert_rowid();

    for (index, (input, p)) in beneficiaries.iter().zip(prepared.iter()).enumerate() {
        let (name_hash, email_hash, relationship_hash, combined_hash, code_cipher, code_hash, units) =
            (&p.0, &p.1, &p.2, &p.3, &p.4, &p.5, p.6);
        tx.execute(
            "INSERT INTO beneficiaries (
                plan_id, beneficiary_index, name, email, relationship,
                name_hash, email_hash, relationship_hash, combined_hash,
                claim_code_cipher, claim_code_hash, allocation_bp, allocated_units
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                plan_id,
                index as u32,
                input.name,
                input.email,
                input.relationship,
                name_hash,
                email_hash,
                relationship_hash,
                combined_hash,
                code_cipher,
                code_hash,
                input.allocation_bp,
                units,
            ],
        )?;
    }

    for period in &periods {
        tx.execute(
            "INSERT INTO distributions (plan_id, period_number, units, scheduled_date, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                plan_id,
                period.period_number,
                period.units,
                period.scheduled_date,
                DistributionStatus::Pending,
            ],
        )?;
    }

    tx.execute(
        "INSERT INTO escrows (plan_id, locked_units, locked_at, fee_bp, fee_units, release_conditions)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![plan_id, net_units, now, fee_bp, fee_units, release_conditions],
    )?;

    tx.commit()?;
    Ok(plan_id)
}

/// Get a plan by id.
pub fn plan_get(conn: &Connection, plan_id: i64) -> StoreResult<Option<PlanRow>> {
    let mut stmt =
        conn.prepare_cached(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1"))?;
    Ok(stmt.query_row(params![plan_id], plan_from_row).optional()?)
}

/// Get a plan, failing if it does not exist.
pub fn plan_require(conn: &Connection, plan_id: i64) -> StoreResult<PlanRow> {
    plan_get(conn, plan_id)?.ok_or(StoreError::PlanNotFound(plan_id))
}

/// List plans in a given status, oldest first.
pub fn plan_list_by_status(conn: &Connection, status: PlanStatus) -> StoreResult<Vec<PlanRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PLAN_COLUMNS} FROM plans WHERE status = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![status], plan_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Compare-and-set status transition: moves the plan to `to` only if its
/// current status is one of `from`. Returns whether a row changed, so a
/// lost race shows up as `false` instead of a silent double-transition.
pub fn plan_update_status(
    conn: &Connection,
    plan_id: i64,
    from: &[PlanStatus],
    to: PlanStatus,
) -> StoreResult<bool> {
    let placeholders = vec!["?"; from.len()].join(", ");
    let sql =
        format!("UPDATE plans SET status = ?1 WHERE id = ?2 AND status IN ({placeholders})");

    let mut values: Vec<rusqlite::types::Value> =
        vec![to.as_str().to_string().into(), plan_id.into()];
    values.extend(from.iter().map(|s| s.as_str().to_string().into()));

    let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
    Ok(affected > 0)
}

/// Mark every-beneficiary-has-claimed on the plan.
pub fn plan_mark_claimed_fully(conn: &Connection, plan_id: i64) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE plans SET is_claimed_fully = 1 WHERE id = ?1 AND is_claimed_fully = 0",
        params![plan_id],
    )?;
    Ok(affected > 0)
}

/// Stamp claim-code delivery. Only the first stamp wins, so a racing
/// second scheduler pass does not re-send codes.
pub fn plan_stamp_claim_codes_sent(conn: &Connection, plan_id: i64, now: i64) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE plans SET claim_codes_sent_at = ?2
         WHERE id = ?1 AND claim_codes_sent_at IS NULL",
        params![plan_id, now],
    )?;
    Ok(affected > 0)
}

/// Rotate the check-in token and stamp the prompt send time.
pub fn plan_stamp_verification_sent(
    conn: &Connection,
    plan_id: i64,
    token: &str,
    now: i64,
) -> StoreResult<()> {
    conn.execute(
        "UPDATE plans SET verification_token = ?2, last_verification_sent = ?3 WHERE id = ?1",
        params![plan_id, token, now],
    )?;
    Ok(())
}

/// Record an owner check-in. The presented token must match the stored
/// single-use token; on success the token is consumed and the failure
/// counter resets. Returns false on a token mismatch.
pub fn plan_record_check_in(
    conn: &Connection,
    plan_id: i64,
    token: &str,
    now: i64,
) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE plans SET verification_token = NULL, verification_fail_count = 0,
                last_verification_at = ?3
         WHERE id = ?1 AND verification_token = ?2",
        params![plan_id, token, now],
    )?;
    Ok(affected > 0)
}

/// Record a missed check-in and return the new failure count.
pub fn plan_record_missed_check_in(conn: &Connection, plan_id: i64) -> StoreResult<u32> {
    conn.execute(
        "UPDATE plans SET verification_fail_count = verification_fail_count + 1 WHERE id = ?1",
        params![plan_id],
    )?;
    let mut stmt =
        conn.prepare_cached("SELECT verification_fail_count FROM plans WHERE id = ?1")?;
    stmt.query_row(params![plan_id], |row| row.get(0))
        .optional()?
        .ok_or(StoreError::PlanNotFound(plan_id))
}

/// All beneficiaries of a plan, in index order.
pub fn beneficiaries_for_plan(conn: &Connection, plan_id: i64) -> StoreResult<Vec<BeneficiaryRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BENEFICIARY_COLUMNS} FROM beneficiaries
         WHERE plan_id = ?1 ORDER BY beneficiary_index"
    ))?;
    let rows = stmt.query_map(params![plan_id], beneficiary_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Get one beneficiary by plan and index.
pub fn beneficiary_get(
    conn: &Connection,
    plan_id: i64,
    index: u32,
) -> StoreResult<Option<BeneficiaryRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BENEFICIARY_COLUMNS} FROM beneficiaries
         WHERE plan_id = ?1 AND beneficiary_index = ?2"
    ))?;
    Ok(stmt
        .query_row(params![plan_id, index], beneficiary_from_row)
        .optional()?)
}

/// Find the beneficiary whose stored combined digest matches. This is the
/// only lookup the claim path uses; individual field digests are never
/// matched on their own.
pub fn beneficiary_find_by_combined_hash(
    conn: &Connection,
    plan_id: i64,
    combined_hash: &str,
) -> StoreResult<Option<BeneficiaryRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BENEFICIARY_COLUMNS} FROM beneficiaries
         WHERE plan_id = ?1 AND combined_hash = ?2"
    ))?;
    Ok(stmt
        .query_row(params![plan_id, combined_hash], beneficiary_from_row)
        .optional()?)
}

/// Flip a beneficiary from unclaimed to claimed. Monotonic: the guard on
/// `has_claimed = 0` means a second call changes nothing and returns
/// false, leaving the original claim metadata intact.
pub fn beneficiary_mark_claimed(
    conn: &Connection,
    plan_id: i64,
    index: u32,
    claimer_address: &str,
    claimed_units: u64,
    claim_tx_hash: &str,
    now: i64,
) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE beneficiaries
         SET has_claimed = 1, claimed_at = ?3, claimed_by_address = ?4,
             claimed_units = ?5, claim_tx_hash = ?6
         WHERE plan_id = ?1 AND beneficiary_index = ?2 AND has_claimed = 0",
        params![plan_id, index, now, claimer_address, claimed_units, claim_tx_hash],
    )?;
    Ok(affected > 0)
}

/// Whether any beneficiary of the plan has claimed.
pub fn beneficiaries_any_claimed(conn: &Connection, plan_id: i64) -> StoreResult<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(*) FROM beneficiaries WHERE plan_id = ?1 AND has_claimed = 1",
    )?;
    let count: i64 = stmt.query_row(params![plan_id], |row| row.get(0))?;
    Ok(count > 0)
}

/// Whether every beneficiary of the plan has claimed.
pub fn beneficiaries_all_claimed(conn: &Connection, plan_id: i64) -> StoreResult<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(*) FROM beneficiaries WHERE plan_id = ?1 AND has_claimed = 0",
    )?;
    let unclaimed: i64 = stmt.query_row(params![plan_id], |row| row.get(0))?;
    Ok(unclaimed == 0)
}

/// The escrow record for a plan.
pub fn escrow_get(conn: &Connection, plan_id: i64) -> StoreResult<Option<EscrowRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT plan_id, locked_units, locked_at, fee_bp, fee_units, release_conditions,
                released_units, refunded_at
         FROM escrows WHERE plan_id = ?1",
    )?;
    Ok(stmt
        .query_row(params![plan_id], |row| {
            Ok(EscrowRow {
                plan_id: row.get(0)?,
                locked_units: row.get(1)?,
                locked_at: row.get(2)?,
                fee_bp: row.get(3)?,
                fee_units: row.get(4)?,
                release_conditions: row.get(5)?,
                released_units: row.get(6)?,
                refunded_at: row.get(7)?,
            })
        })
        .optional()?)
}

/// Account for a release from escrow. Rejects any release that would
/// push the released total past the locked amount; the guard lives in
/// the UPDATE itself so concurrent writers cannot overshoot.
pub fn escrow_record_release(conn: &Connection, plan_id: i64, units: u64) -> StoreResult<()> {
    let affected = conn.execute(
        "UPDATE escrows SET released_units = released_units + ?2
         WHERE plan_id = ?1 AND released_units + ?2 <= locked_units AND refunded_at IS NULL",
        params![plan_id, units],
    )?;
    if affected == 0 {
        return Err(StoreError::ReleaseExceedsEscrow { plan_id, units });
    }
    Ok(())
}

/// Mark the escrow refunded to the owner (plan cancellation).
pub fn escrow_mark_refunded(conn: &Connection, plan_id: i64, now: i64) -> StoreResult<bool> {
    let affected = conn.execute(
        "UPDATE escrows SET refunded_at = ?2, released_units = locked_units
         WHERE plan_id = ?1 AND refunded_at IS NULL",
        params![plan_id, now],
    )?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::distributions_for_plan;
    use crate::test_util::*;

    #[test]
    fn test_create_plan_persists_everything() {
        let mut conn = test_conn();
        let cipher = test_cipher();

        let plan_id =
            create_plan(&mut conn, &cipher, &lump_plan(1_700_000_000), &two_beneficiaries(), 100)
                .unwrap();

        let plan = plan_get(&conn, plan_id).unwrap().unwrap();
        assert_eq!(plan.status, PlanStatus::Active);
        assert_eq!(plan.method, DistributionMethod::LumpSum);
        assert_eq!(plan.transfer_date, Some(1_700_000_000));
        // 200 bp fee on 1_000_000 gross
        assert_eq!(plan.total_units, 980_000);
        assert!(!plan.is_claimed_fully);

        let beneficiaries = beneficiaries_for_plan(&conn, plan_id).unwrap();
        assert_eq!(beneficiaries.len(), 2);
        assert_eq!(beneficiaries[0].beneficiary_index, 0);
        assert_eq!(beneficiaries[0].allocated_units, 588_000); // 60% of net
        assert_eq!(beneficiaries[1].allocated_units, 392_000);
        assert!(!beneficiaries[0].has_claimed);

        // Codes are stored hashed + encrypted, never bare
        assert_ne!(beneficiaries[0].claim_code_hash, "AB12CD");
        assert_ne!(beneficiaries[0].claim_code_cipher, "AB12CD");
        assert_eq!(
            cipher.decrypt(&beneficiaries[0].claim_code_cipher).unwrap(),
            "AB12CD"
        );

        let escrow = escrow_get(&conn, plan_id).unwrap().unwrap();
        assert_eq!(escrow.locked_units, 980_000);
        assert_eq!(escrow.fee_units, 20_000);
        assert_eq!(escrow.released_units, 0);
    }

    #[test]
    fn test_create_plan_rejects_bad_allocations() {
        let mut conn = test_conn();
        let cipher = test_cipher();

        let mut bad = two_beneficiaries();
        bad[1].allocation_bp = 3000; // sums to 9000

        let err =
            create_plan(&mut conn, &cipher, &lump_plan(0), &bad, 100).unwrap_err();
        assert!(matches!(err, StoreError::Allocation(_)));

        // Nothing was written
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM plans", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_create_plan_rejects_bad_claim_code() {
        let mut conn = test_conn();
        let cipher = test_cipher();

        let mut bad = two_beneficiaries();
        bad[0].claim_code = "short".into();

        let err = create_plan(&mut conn, &cipher, &lump_plan(0), &bad, 100).unwrap_err();
        assert!(matches!(err, StoreError::ClaimCode(_)));
    }

    #[test]
    fn test_create_periodic_plan_materializes_periods() {
        let mut conn = test_conn();
        let cipher = test_cipher();

        let start = 1_700_000_000;
        let plan_id = create_plan(
            &mut conn,
            &cipher,
            &periodic_plan(25, start),
            &two_beneficiaries(),
            100,
        )
        .unwrap();

        let plan = plan_get(&conn, plan_id).unwrap().unwrap();
        assert_eq!(plan.periodic_percent, Some(25));
        assert_eq!(plan.start_date, Some(start));

        let periods = distributions_for_plan(&conn, plan_id).unwrap();
        assert_eq!(periods.len(), 4);
        assert_eq!(
            periods.iter().map(|p| p.period_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        // Amounts sum exactly to the net total
        assert_eq!(periods.iter().map(|p| p.units).sum::<u64>(), 980_000);
        // Strictly increasing dates
        for pair in periods.windows(2) {
            assert!(pair[0].scheduled_date < pair[1].scheduled_date);
        }
        assert_eq!(plan.end_date, Some(periods[3].scheduled_date));
    }

    #[test]
    fn test_create_periodic_plan_rejects_bad_percentage() {
        let mut conn = test_conn();
        let cipher = test_cipher();

        let err = create_plan(
            &mut conn,
            &cipher,
            &periodic_plan(30, 1_700_000_000),
            &two_beneficiaries(),
            100,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Allocation(_)));
    }

    #[test]
    fn test_status_compare_and_set() {
        let mut conn = test_conn();
        let cipher = test_cipher();
        let plan_id =
            create_plan(&mut conn, &cipher, &lump_plan(0), &two_beneficiaries(), 100).unwrap();

        // Active -> Paused succeeds
        assert!(plan_update_status(&conn, plan_id, &[PlanStatus::Active], PlanStatus::Paused)
            .unwrap());
        // Active -> Paused again fails (already paused)
        assert!(!plan_update_status(&conn, plan_id, &[PlanStatus::Active], PlanStatus::Paused)
            .unwrap());
        // Paused or Active -> Cancelled succeeds
        assert!(plan_update_status(
            &conn,
            plan_id,
            &[PlanStatus::Active, PlanStatus::Paused],
            PlanStatus::Cancelled
        )
        .unwrap());
        assert_eq!(
            plan_get(&conn, plan_id).unwrap().unwrap().status,
            PlanStatus::Cancelled
        );
    }

    #[test]
    fn test_beneficiary_claim_is_monotonic() {
        let mut conn = test_conn();
        let cipher = test_cipher();
        let plan_id =
            create_plan(&mut conn, &cipher, &lump_plan(0), &two_beneficiaries(), 100).unwrap();

        assert!(beneficiary_mark_claimed(&conn, plan_id, 0, "0xclaimer", 588_000, "0xtx1", 200)
            .unwrap());

        // Second attempt changes nothing
        assert!(!beneficiary_mark_claimed(&conn, plan_id, 0, "0xother", 1, "0xtx2", 300)
            .unwrap());

        let b = beneficiary_get(&conn, plan_id, 0).unwrap().unwrap();
        assert!(b.has_claimed);
        assert_eq!(b.claimed_units, Some(588_000));
        assert_eq!(b.claimed_by_address.as_deref(), Some("0xclaimer"));
        assert_eq!(b.claim_tx_hash.as_deref(), Some("0xtx1"));
        assert_eq!(b.claimed_at, Some(200));

        assert!(beneficiaries_any_claimed(&conn, plan_id).unwrap());
        assert!(!beneficiaries_all_claimed(&conn, plan_id).unwrap());

        assert!(beneficiary_mark_claimed(&conn, plan_id, 1, "0xother", 392_000, "0xtx3", 400)
            .unwrap());
        assert!(beneficiaries_all_claimed(&conn, plan_id).unwrap());
    }

    #[test]
    fn test_combined_hash_lookup() {
        let mut conn = test_conn();
        let cipher = test_cipher();
        let plan_id =
            create_plan(&mut conn, &cipher, &lump_plan(0), &two_beneficiaries(), 100).unwrap();

        let digest = heirloom_core::combined_digest(
            "Alice Example",
            "alice@example.com",
            "daughter",
            "AB12CD",
        )
        .unwrap();
        let found = beneficiary_find_by_combined_hash(&conn, plan_id, &digest)
            .unwrap()
            .unwrap();
        assert_eq!(found.beneficiary_index, 0);

        // One wrong field finds nothing
        let wrong = heirloom_core::combined_digest(
            "Alice Example",
            "alice@example.com",
            "niece",
            "AB12CD",
        )
        .unwrap();
        assert!(beneficiary_find_by_combined_hash(&conn, plan_id, &wrong)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_escrow_release_accounting() {
        let mut conn = test_conn();
        let cipher = test_cipher();
        let plan_id =
            create_plan(&mut conn, &cipher, &lump_plan(0), &two_beneficiaries(), 100).unwrap();

        escrow_record_release(&conn, plan_id, 588_000).unwrap();
        escrow_record_release(&conn, plan_id, 392_000).unwrap();

        // Escrow is exhausted; one more unit must fail
        let err = escrow_record_release(&conn, plan_id, 1).unwrap_err();
        assert!(matches!(err, StoreError::ReleaseExceedsEscrow { .. }));

        let escrow = escrow_get(&conn, plan_id).unwrap().unwrap();
        assert_eq!(escrow.remaining_units(), 0);
    }

    #[test]
    fn test_escrow_refund() {
        let mut conn = test_conn();
        let cipher = test_cipher();
        let plan_id =
            create_plan(&mut conn, &cipher, &lump_plan(0), &two_beneficiaries(), 100).unwrap();

        assert!(escrow_mark_refunded(&conn, plan_id, 500).unwrap());
        // Idempotent: second refund is a no-op
        assert!(!escrow_mark_refunded(&conn, plan_id, 600).unwrap());

        // No further releases after refund
        assert!(escrow_record_release(&conn, plan_id, 1).is_err());
    }

    #[test]
    fn test_check_in_token_roundtrip() {
        let mut conn = test_conn();
        let cipher = test_cipher();
        let mut plan = lump_plan(0);
        plan.proof_of_life_enabled = true;
        let plan_id = create_plan(&mut conn, &cipher, &plan, &two_beneficiaries(), 100).unwrap();

        plan_stamp_verification_sent(&conn, plan_id, "tok-1", 200).unwrap();
        let row = plan_get(&conn, plan_id).unwrap().unwrap();
        assert_eq!(row.verification_token.as_deref(), Some("tok-1"));
        assert_eq!(row.last_verification_sent, Some(200));

        // Wrong token rejected
        assert!(!plan_record_check_in(&conn, plan_id, "tok-0", 300).unwrap());

        // Correct token consumes itself and resets the counter
        plan_record_missed_check_in(&conn, plan_id).unwrap();
        assert!(plan_record_check_in(&conn, plan_id, "tok-1", 300).unwrap());
        let row = plan_get(&conn, plan_id).unwrap().unwrap();
        assert!(row.verification_token.is_none());
        assert_eq!(row.verification_fail_count, 0);
        assert_eq!(row.last_verification_at, Some(300));

        // Token is single-use: replay fails
        assert!(!plan_record_check_in(&conn, plan_id, "tok-1", 400).unwrap());
    }

    #[test]
    fn test_missed_check_in_counter() {
        let mut conn = test_conn();
        let cipher = test_cipher();
        let plan_id =
            create_plan(&mut conn, &cipher, &lump_plan(0), &two_beneficiaries(), 100).unwrap();

        assert_eq!(plan_record_missed_check_in(&conn, plan_id).unwrap(), 1);
        assert_eq!(plan_record_missed_check_in(&conn, plan_id).unwrap(), 2);
        assert_eq!(plan_record_missed_check_in(&conn, plan_id).unwrap(), 3);
    }

    #[test]
    fn test_fee_from_settings() {
        let mut conn = test_conn();
        let cipher = test_cipher();

        // Override the seeded default fee
        crate::settings::settings_set(&conn, "fee_bps", "500").unwrap();
        let plan_id =
            create_plan(&mut conn, &cipher, &lump_plan(0), &two_beneficiaries(), 100).unwrap();

        let escrow = escrow_get(&conn, plan_id).unwrap().unwrap();
        assert_eq!(escrow.fee_bp, 500);
        assert_eq!(escrow.fee_units, 50_000);
        assert_eq!(escrow.locked_units, 950_000);
    }
}
