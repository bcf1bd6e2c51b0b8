//! The recurring distribution pass.
//!
//! Each pass scans active plans and acts on at most one due item per
//! plan:
//!
//! - periodic plans: the lowest-numbered open period, executed when its
//!   date has passed, or pre-notified when it is coming up. Acting only
//!   on the lowest open period is what guarantees period N+1 never
//!   executes before period N, even when both are overdue.
//! - lump-sum plans: once the plan turns claimable (date reached or the
//!   inactivity failsafe engaged), claim codes go out to beneficiaries
//!   exactly once, opening the claim window.
//!
//! Every mutation happens under a per-plan lock row with an expiry, with
//! eligibility re-checked inside the lock, so two racing scheduler
//! instances (or a pass racing an admin cancel) cannot execute the same
//! item twice. Ledger failures leave the item open and bump an attempt
//! counter; the ceiling marks it FAILED and raises an operator alert.

use crate::claim::is_plan_claimable;
use crate::external::{call_with_timeout, EngineContext};
use crate::proof_of_life::ProofOfLifeConfig;
use crate::{lifecycle, EngineError};
use heirloom_core::CipherKey;
use heirloom_store::{
    acquire_plan_lock, distributions, plans, DistributionMethod, DistributionRow,
    DistributionStatus, PlanRow, PlanStatus,
};
use rusqlite::Connection;
use serde_json::json;
use std::time::{Duration, Instant};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Identity written into lock rows, unique per worker instance.
    pub holder: String,

    /// Attempts before a distribution is marked FAILED.
    pub max_attempts: u32,

    /// Deadline for each external call.
    pub call_timeout: Duration,

    /// Deadline for a whole pass; remaining plans wait for the next one.
    pub pass_deadline: Duration,

    /// How far ahead of its date a period is pre-notified.
    pub notice_window_secs: i64,

    /// Lock row time-to-live. Must comfortably exceed `call_timeout`.
    pub lock_ttl_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            holder: "scheduler".into(),
            max_attempts: 5,
            call_timeout: Duration::from_secs(30),
            pass_deadline: Duration::from_secs(300),
            notice_window_secs: 86_400,
            lock_ttl_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.lock_ttl_secs <= self.call_timeout.as_secs() as i64 {
            return Err(EngineError::InvalidConfig(
                "lock_ttl_secs must exceed call_timeout".into(),
            ));
        }
        Ok(())
    }
}

/// Counters from one scheduler pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub executed: u32,
    pub notified: u32,
    pub failed: u32,
    pub codes_delivered: u32,
    pub expired: u32,
    pub skipped: u32,
}

/// The distribution scheduler. Stateless between passes; safe to run
/// from several worker instances concurrently thanks to the lock rows.
pub struct DistributionScheduler {
    config: SchedulerConfig,
    pol: ProofOfLifeConfig,
}

impl DistributionScheduler {
    pub fn new(config: SchedulerConfig, pol: ProofOfLifeConfig) -> Result<Self, EngineError> {
        config.validate()?;
        pol.validate()?;
        Ok(Self { config, pol })
    }

    /// Run one pass over all active plans.
    pub async fn run_pass(
        &self,
        conn: &Connection,
        cipher: &CipherKey,
        ctx: &EngineContext<'_>,
        now: i64,
    ) -> Result<PassSummary, EngineError> {
        let started = Instant::now();
        let mut summary = PassSummary::default();

        let active = plans::plan_list_by_status(conn, PlanStatus::Active)?;
        log::debug!("scheduler pass over {} active plans", active.len());

        for plan in active {
            if started.elapsed() >= self.config.pass_deadline {
                log::warn!(
                    "pass deadline reached with plan {} and later still pending",
                    plan.id
                );
                summary.skipped += 1;
                break;
            }

            let result = match plan.method {
                DistributionMethod::LumpSum => {
                    self.process_lump_sum(conn, cipher, ctx, &plan, now, &mut summary).await
                }
                _ => self.process_periodic(conn, ctx, &plan, now, &mut summary).await,
            };

            // One stuck or failing plan must not take down the pass.
            if let Err(e) = result {
                log::error!("scheduler error on plan {}: {}", plan.id, e);
            }
        }

        Ok(summary)
    }

    /// Lump-sum plans: deliver claim codes once the plan is claimable.
    ///
    /// Funds are not pushed anywhere; no recipient address exists until
    /// a beneficiary claims. Opening the window and delivering codes is
    /// the scheduler's whole job here, and the plan reaches EXECUTED
    /// through `complete_claim` once every share is claimed.
    async fn process_lump_sum(
        &self,
        conn: &Connection,
        cipher: &CipherKey,
        ctx: &EngineContext<'_>,
        plan: &PlanRow,
        now: i64,
        summary: &mut PassSummary,
    ) -> Result<(), EngineError> {
        if plan.claim_codes_sent_at.is_some() || !is_plan_claimable(plan, &self.pol, now) {
            return Ok(());
        }

        let Some(lock) =
            acquire_plan_lock(conn, plan.id, &self.config.holder, now, self.config.lock_ttl_secs)?
        else {
            summary.skipped += 1;
            return Ok(());
        };

        // Re-check inside the lock
        let plan = plans::plan_require(conn, plan.id)?;
        if plan.status != PlanStatus::Active
            || plan.claim_codes_sent_at.is_some()
            || !is_plan_claimable(&plan, &self.pol, now)
        {
            return Ok(());
        }

        let mut all_sent = true;
        for beneficiary in plans::beneficiaries_for_plan(conn, plan.id)? {
            let code = cipher
                .decrypt(&beneficiary.claim_code_cipher)
                .map_err(heirloom_store::StoreError::from)?;
            let send = call_with_timeout(
                self.config.call_timeout,
                ctx.notifier
                    .send_claim_code(&beneficiary.email, &plan.name, &code),
            )
            .await;
            if let Err(e) = send {
                log::error!(
                    "claim code delivery to beneficiary {} of plan {} failed: {}",
                    beneficiary.beneficiary_index,
                    plan.id,
                    e
                );
                all_sent = false;
            }
        }

        // Stamp only when every code went out; a partial send retries
        // next pass (delivery is repeat-safe, the codes do not change).
        if all_sent && plans::plan_stamp_claim_codes_sent(conn, plan.id, now)? {
            summary.codes_delivered += 1;
            ctx.activity.record(
                lifecycle::SYSTEM_ACTOR,
                "claim_window_opened",
                &format!("Plan {} is claimable; claim codes delivered", plan.id),
                Some(json!({ "plan_id": plan.id })),
            );
        }

        lock.release()?;
        Ok(())
    }

    /// Periodic plans: act on the lowest open period only.
    async fn process_periodic(
        &self,
        conn: &Connection,
        ctx: &EngineContext<'_>,
        plan: &PlanRow,
        now: i64,
        summary: &mut PassSummary,
    ) -> Result<(), EngineError> {
        let Some(next) = distributions::next_open_distribution(conn, plan.id)? else {
            // No open work left. Every period executed means the plan is
            // complete (normally already marked at execution time; this
            // recovers a lost final transition). Any failed or cancelled
            // period means the schedule can never complete.
            let all_executed = distributions::distributions_for_plan(conn, plan.id)?
                .iter()
                .all(|p| p.status == DistributionStatus::Executed);
            if all_executed {
                lifecycle::mark_executed(conn, ctx.activity, plan.id)?;
            } else if lifecycle::mark_expired(conn, ctx.activity, plan.id)? {
                summary.expired += 1;
                let message = format!(
                    "Plan {} expired with unexecuted periods; escrow remainder needs review",
                    plan.id
                );
                if let Err(e) = call_with_timeout(
                    self.config.call_timeout,
                    ctx.notifier.send_operator_alert(&message),
                )
                .await
                {
                    log::error!("operator alert for plan {} failed: {}", plan.id, e);
                }
            }
            return Ok(());
        };

        if next.scheduled_date <= now {
            self.execute_period(conn, ctx, plan, &next, now, summary).await
        } else {
            if next.status == DistributionStatus::Pending
                && next.scheduled_date - now <= self.config.notice_window_secs
            {
                self.notify_period(conn, ctx, plan, &next, summary).await?;
            }
            Ok(())
        }
    }

    async fn execute_period(
        &self,
        conn: &Connection,
        ctx: &EngineContext<'_>,
        plan: &PlanRow,
        due: &DistributionRow,
        now: i64,
        summary: &mut PassSummary,
    ) -> Result<(), EngineError> {
        let Some(lock) =
            acquire_plan_lock(conn, plan.id, &self.config.holder, now, self.config.lock_ttl_secs)?
        else {
            summary.skipped += 1;
            return Ok(());
        };

        // Re-check inside the lock: the plan may have been paused or
        // cancelled, and the period may have been executed by a racing
        // worker between the scan and the lock.
        let plan = plans::plan_require(conn, plan.id)?;
        if plan.status != PlanStatus::Active {
            return Ok(());
        }
        let Some(current) = distributions::next_open_distribution(conn, plan.id)? else {
            return Ok(());
        };
        if current.period_number != due.period_number || current.scheduled_date > now {
            return Ok(());
        }

        let released = call_with_timeout(
            self.config.call_timeout,
            ctx.ledger
                .release_distribution(plan.id, current.period_number, current.units),
        )
        .await;

        match released {
            Ok(tx_hash) => {
                let tx = conn
                    .unchecked_transaction()
                    .map_err(heirloom_store::StoreError::from)?;
                if !distributions::distribution_mark_executed(
                    &tx,
                    plan.id,
                    current.period_number,
                    &tx_hash,
                    now,
                )? {
                    log::warn!(
                        "period {} of plan {} executed elsewhere, dropping duplicate result",
                        current.period_number,
                        plan.id
                    );
                    return Ok(());
                }
                plans::escrow_record_release(&tx, plan.id, current.units)?;
                tx.commit().map_err(heirloom_store::StoreError::from)?;

                summary.executed += 1;
                ctx.activity.record(
                    lifecycle::SYSTEM_ACTOR,
                    "distribution_executed",
                    &format!(
                        "Period {} of plan {} released {} units",
                        current.period_number, plan.id, current.units
                    ),
                    Some(json!({
                        "plan_id": plan.id,
                        "period": current.period_number,
                        "units": current.units,
                        "tx_hash": tx_hash,
                    })),
                );

                for beneficiary in plans::beneficiaries_for_plan(conn, plan.id)? {
                    if let Err(e) = call_with_timeout(
                        self.config.call_timeout,
                        ctx.notifier.send_distribution_notice(
                            &beneficiary.email,
                            &plan.name,
                            current.period_number,
                            current.units,
                        ),
                    )
                    .await
                    {
                        log::warn!(
                            "distribution notice to beneficiary {} of plan {} failed: {}",
                            beneficiary.beneficiary_index,
                            plan.id,
                            e
                        );
                    }
                }

                // The final period executing completes the plan, as long
                // as every earlier period actually executed too.
                if distributions::open_distribution_count(conn, plan.id)? == 0 {
                    let all_executed = distributions::distributions_for_plan(conn, plan.id)?
                        .iter()
                        .all(|p| p.status == DistributionStatus::Executed);
                    if all_executed {
                        lifecycle::mark_executed(conn, ctx.activity, plan.id)?;
                    }
                }
            }
            Err(e) => {
                // Left open deliberately: the next pass retries.
                let attempts =
                    distributions::distribution_record_attempt(conn, plan.id, current.period_number)?;
                log::warn!(
                    "release of period {} of plan {} failed (attempt {}/{}): {}",
                    current.period_number,
                    plan.id,
                    attempts,
                    self.config.max_attempts,
                    e
                );

                if attempts >= self.config.max_attempts {
                    distributions::distribution_mark_failed(conn, plan.id, current.period_number)?;
                    summary.failed += 1;

                    let message = format!(
                        "Period {} of plan {} failed after {} attempts",
                        current.period_number, plan.id, attempts
                    );
                    ctx.activity.record(
                        lifecycle::SYSTEM_ACTOR,
                        "distribution_failed",
                        &message,
                        Some(json!({
                            "plan_id": plan.id,
                            "period": current.period_number,
                            "attempts": attempts,
                        })),
                    );
                    if let Err(alert_err) = call_with_timeout(
                        self.config.call_timeout,
                        ctx.notifier.send_operator_alert(&message),
                    )
                    .await
                    {
                        log::error!("operator alert for plan {} failed: {}", plan.id, alert_err);
                    }
                }
            }
        }

        lock.release()?;
        Ok(())
    }

    async fn notify_period(
        &self,
        conn: &Connection,
        ctx: &EngineContext<'_>,
        plan: &PlanRow,
        period: &DistributionRow,
        summary: &mut PassSummary,
    ) -> Result<(), EngineError> {
        if !distributions::distribution_mark_notified(conn, plan.id, period.period_number)? {
            return Ok(());
        }
        summary.notified += 1;

        for beneficiary in plans::beneficiaries_for_plan(conn, plan.id)? {
            if let Err(e) = call_with_timeout(
                self.config.call_timeout,
                ctx.notifier.send_distribution_notice(
                    &beneficiary.email,
                    &plan.name,
                    period.period_number,
                    period.units,
                ),
            )
            .await
            {
                log::warn!(
                    "upcoming-distribution notice for plan {} failed: {}",
                    plan.id,
                    e
                );
            }
        }
        Ok(())
    }
}
