//! Proof-of-life monitoring.
//!
//! For plans with the failsafe enabled, the monitor periodically sends
//! the owner a check-in prompt carrying a single-use token. An answered
//! prompt resets the failure counter; an unanswered one increments it.
//! Crossing the configured threshold with early claims enabled makes the
//! plan claimable immediately (see [`crate::claim::is_plan_claimable`]);
//! that state is computed at verification time, never stored.

use crate::external::{call_with_timeout, EngineContext};
use crate::{ActivityLog, EngineError};
use heirloom_store::{plans, PlanRow, PlanStatus};
use rand::RngCore;
use rusqlite::Connection;
use serde_json::json;
use std::time::Duration;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct ProofOfLifeConfig {
    /// Seconds between check-in prompts. Default: 30 days.
    pub prompt_interval_secs: i64,

    /// Missed check-ins before the inactivity failsafe engages.
    pub fail_threshold: u32,

    /// Deadline for each notification send.
    pub call_timeout: Duration,
}

impl Default for ProofOfLifeConfig {
    fn default() -> Self {
        Self {
            prompt_interval_secs: 30 * 24 * 60 * 60,
            fail_threshold: 3,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl ProofOfLifeConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.prompt_interval_secs <= 0 {
            return Err(EngineError::InvalidConfig(
                "prompt_interval_secs must be positive".into(),
            ));
        }
        if self.fail_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "fail_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Where a plan stands in the check-in cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInState {
    /// Recently prompted or recently confirmed; nothing to do.
    Healthy,
    /// The prompt cadence has elapsed; a new prompt is due.
    PromptDue,
    /// The failure counter has crossed the threshold.
    ThresholdExceeded,
}

/// Evaluate a plan's check-in state. Pure: takes stored state and a
/// clock, returns a recommendation; the monitor pass decides what to do.
pub fn evaluate(plan: &PlanRow, config: &ProofOfLifeConfig, now: i64) -> CheckInState {
    if plan.verification_fail_count >= config.fail_threshold {
        return CheckInState::ThresholdExceeded;
    }
    let due = plan
        .last_verification_sent
        .map_or(true, |sent| now - sent >= config.prompt_interval_secs);
    if due {
        CheckInState::PromptDue
    } else {
        CheckInState::Healthy
    }
}

/// Fresh single-use verification token (32 hex chars).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Counters from one monitor pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PolSummary {
    pub prompts_sent: u32,
    pub misses_recorded: u32,
    pub thresholds_crossed: u32,
}

/// The proof-of-life monitor. Stateless between passes.
pub struct ProofOfLifeMonitor {
    config: ProofOfLifeConfig,
}

impl ProofOfLifeMonitor {
    pub fn new(config: ProofOfLifeConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProofOfLifeConfig {
        &self.config
    }

    /// One monitor pass over all active plans with the failsafe enabled.
    ///
    /// When the cadence elapses: an unanswered previous prompt counts as
    /// a miss, then the token is rotated and a fresh prompt goes out.
    /// A failed send is logged and retried on the next pass; the token
    /// is only stamped after the send succeeded, so an undelivered
    /// prompt can never invalidate a link the owner actually received.
    pub async fn run_pass(
        &self,
        conn: &Connection,
        ctx: &EngineContext<'_>,
        now: i64,
    ) -> Result<PolSummary, EngineError> {
        let mut summary = PolSummary::default();

        for plan in plans::plan_list_by_status(conn, PlanStatus::Active)? {
            if !plan.proof_of_life_enabled {
                continue;
            }

            let due = plan
                .last_verification_sent
                .map_or(true, |sent| now - sent >= self.config.prompt_interval_secs);
            if !due {
                continue;
            }

            // A prompt that was sent but never answered is a miss.
            let unanswered = match (plan.last_verification_sent, plan.last_verification_at) {
                (Some(sent), Some(answered)) => answered < sent,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if unanswered {
                let count = self.record_missed_check_in(conn, ctx.activity, plan.id)?;
                summary.misses_recorded += 1;
                if count == self.config.fail_threshold {
                    summary.thresholds_crossed += 1;
                    self.alert_threshold_crossed(ctx, &plan, count).await;
                }
            }

            let token = generate_token();
            let send = call_with_timeout(
                self.config.call_timeout,
                ctx.notifier
                    .send_check_in_prompt(&plan.owner_email, &plan.name, &token),
            )
            .await;

            match send {
                Ok(()) => {
                    plans::plan_stamp_verification_sent(conn, plan.id, &token, now)?;
                    summary.prompts_sent += 1;
                }
                Err(e) => {
                    log::error!("check-in prompt for plan {} failed: {}", plan.id, e);
                }
            }
        }

        Ok(summary)
    }

    /// Owner confirms activity through the prompt link. The presented
    /// token must match the stored single-use token; success consumes it
    /// and resets the failure counter.
    pub fn record_check_in(
        &self,
        conn: &Connection,
        activity: &dyn ActivityLog,
        plan_id: i64,
        token: &str,
        now: i64,
    ) -> Result<(), EngineError> {
        plans::plan_get(conn, plan_id)?.ok_or(EngineError::PlanNotFound(plan_id))?;

        if !plans::plan_record_check_in(conn, plan_id, token, now)? {
            return Err(EngineError::InvalidVerificationToken);
        }

        activity.record(
            "owner",
            "check_in_recorded",
            &format!("Owner confirmed activity on plan {plan_id}"),
            Some(json!({ "plan_id": plan_id })),
        );
        Ok(())
    }

    /// Count one missed check-in and return the new failure count.
    pub fn record_missed_check_in(
        &self,
        conn: &Connection,
        activity: &dyn ActivityLog,
        plan_id: i64,
    ) -> Result<u32, EngineError> {
        let count = plans::plan_record_missed_check_in(conn, plan_id)?;
        activity.record(
            "system",
            "check_in_missed",
            &format!("Missed check-in {count} on plan {plan_id}"),
            Some(json!({ "plan_id": plan_id, "fail_count": count })),
        );
        Ok(count)
    }

    async fn alert_threshold_crossed(&self, ctx: &EngineContext<'_>, plan: &PlanRow, count: u32) {
        let message = if plan.early_claim_enabled {
            format!(
                "Plan {} crossed {} missed check-ins; early claims are now open",
                plan.id, count
            )
        } else {
            format!(
                "Plan {} crossed {} missed check-ins (early claims disabled)",
                plan.id, count
            )
        };
        ctx.activity.record(
            "system",
            "inactivity_threshold_crossed",
            &message,
            Some(json!({ "plan_id": plan.id, "fail_count": count })),
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    const DAY: i64 = 86_400;

    fn monitor() -> ProofOfLifeMonitor {
        ProofOfLifeMonitor::new(ProofOfLifeConfig {
            prompt_interval_secs: 30 * DAY,
            fail_threshold: 3,
            call_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn pol_plan(conn: &mut rusqlite::Connection, early_claim: bool) -> i64 {
        let mut plan = lump_plan(i64::MAX / 2);
        plan.proof_of_life_enabled = true;
        plan.early_claim_enabled = early_claim;
        heirloom_store::plans::create_plan(conn, &test_cipher(), &plan, &two_beneficiaries(), 0)
            .unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(ProofOfLifeConfig::default().validate().is_ok());
        assert!(ProofOfLifeConfig {
            prompt_interval_secs: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(ProofOfLifeConfig {
            fail_threshold: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_evaluate_states() {
        let mut conn = test_conn();
        let plan_id = pol_plan(&mut conn, true);
        let config = ProofOfLifeConfig::default();

        // Never prompted: due immediately
        let plan = heirloom_store::plans::plan_require(&conn, plan_id).unwrap();
        assert_eq!(evaluate(&plan, &config, 100), CheckInState::PromptDue);

        // Freshly prompted: healthy until the cadence elapses
        heirloom_store::plans::plan_stamp_verification_sent(&conn, plan_id, "tok", 100).unwrap();
        let plan = heirloom_store::plans::plan_require(&conn, plan_id).unwrap();
        assert_eq!(evaluate(&plan, &config, 100 + DAY), CheckInState::Healthy);
        assert_eq!(
            evaluate(&plan, &config, 100 + 30 * DAY),
            CheckInState::PromptDue
        );

        // Threshold dominates everything
        for _ in 0..3 {
            heirloom_store::plans::plan_record_missed_check_in(&conn, plan_id).unwrap();
        }
        let plan = heirloom_store::plans::plan_require(&conn, plan_id).unwrap();
        assert_eq!(
            evaluate(&plan, &config, 100 + DAY),
            CheckInState::ThresholdExceeded
        );
    }

    #[test]
    fn test_generate_token_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(hex::decode(&a).is_ok());
    }

    #[tokio::test]
    async fn test_first_pass_sends_prompt_without_counting_miss() {
        let mut conn = test_conn();
        let t = TestCtx::new();
        let plan_id = pol_plan(&mut conn, true);

        let summary = monitor().run_pass(&conn, &t.ctx(), 1000).await.unwrap();
        assert_eq!(summary.prompts_sent, 1);
        assert_eq!(summary.misses_recorded, 0);

        let plan = heirloom_store::plans::plan_require(&conn, plan_id).unwrap();
        assert_eq!(plan.last_verification_sent, Some(1000));
        let token = plan.verification_token.unwrap();
        assert_eq!(
            t.notifier.sent_log(),
            vec![format!("checkin:owner@example.com:{token}")]
        );
    }

    #[tokio::test]
    async fn test_pass_within_cadence_is_quiet() {
        let mut conn = test_conn();
        let t = TestCtx::new();
        pol_plan(&mut conn, true);

        let m = monitor();
        m.run_pass(&conn, &t.ctx(), 1000).await.unwrap();
        let summary = m.run_pass(&conn, &t.ctx(), 1000 + DAY).await.unwrap();
        assert_eq!(summary, PolSummary::default());
        assert_eq!(t.notifier.sent_log().len(), 1);
    }

    #[tokio::test]
    async fn test_unanswered_prompt_counts_miss_and_rotates_token() {
        let mut conn = test_conn();
        let t = TestCtx::new();
        let plan_id = pol_plan(&mut conn, true);

        let m = monitor();
        m.run_pass(&conn, &t.ctx(), 1000).await.unwrap();
        let first_token = heirloom_store::plans::plan_require(&conn, plan_id)
            .unwrap()
            .verification_token
            .unwrap();

        let summary = m.run_pass(&conn, &t.ctx(), 1000 + 30 * DAY).await.unwrap();
        assert_eq!(summary.misses_recorded, 1);
        assert_eq!(summary.prompts_sent, 1);

        let plan = heirloom_store::plans::plan_require(&conn, plan_id).unwrap();
        assert_eq!(plan.verification_fail_count, 1);
        // Old token replaced: replay of the first link must fail
        let second_token = plan.verification_token.unwrap();
        assert_ne!(first_token, second_token);
        assert!(matches!(
            m.record_check_in(&conn, &t.activity, plan_id, &first_token, 0),
            Err(EngineError::InvalidVerificationToken)
        ));
    }

    #[tokio::test]
    async fn test_answered_prompt_does_not_count_miss() {
        let mut conn = test_conn();
        let t = TestCtx::new();
        let plan_id = pol_plan(&mut conn, true);

        let m = monitor();
        m.run_pass(&conn, &t.ctx(), 1000).await.unwrap();
        let token = heirloom_store::plans::plan_require(&conn, plan_id)
            .unwrap()
            .verification_token
            .unwrap();
        m.record_check_in(&conn, &t.activity, plan_id, &token, 1000 + DAY)
            .unwrap();

        let summary = m.run_pass(&conn, &t.ctx(), 1000 + 30 * DAY).await.unwrap();
        assert_eq!(summary.misses_recorded, 0);
        assert_eq!(summary.prompts_sent, 1);
        assert_eq!(
            heirloom_store::plans::plan_require(&conn, plan_id)
                .unwrap()
                .verification_fail_count,
            0
        );
    }

    #[tokio::test]
    async fn test_threshold_crossing_raises_alert_once() {
        let mut conn = test_conn();
        let t = TestCtx::new();
        let plan_id = pol_plan(&mut conn, true);

        let m = monitor();
        let mut now = 1000;
        // Initial prompt, then three unanswered cycles
        m.run_pass(&conn, &t.ctx(), now).await.unwrap();
        for _ in 0..3 {
            now += 30 * DAY;
            m.run_pass(&conn, &t.ctx(), now).await.unwrap();
        }

        let plan = heirloom_store::plans::plan_require(&conn, plan_id).unwrap();
        assert_eq!(plan.verification_fail_count, 3);

        let alerts: Vec<_> = t
            .notifier
            .sent_log()
            .into_iter()
            .filter(|s| s.starts_with("alert:"))
            .collect();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("early claims are now open"));
        assert!(t
            .activity
            .kinds()
            .contains(&"inactivity_threshold_crossed".to_string()));
    }

    #[tokio::test]
    async fn test_check_in_resets_counter_after_misses() {
        let mut conn = test_conn();
        let t = TestCtx::new();
        let plan_id = pol_plan(&mut conn, true);

        let m = monitor();
        m.run_pass(&conn, &t.ctx(), 1000).await.unwrap();
        m.run_pass(&conn, &t.ctx(), 1000 + 30 * DAY).await.unwrap();
        m.run_pass(&conn, &t.ctx(), 1000 + 60 * DAY).await.unwrap();
        assert_eq!(
            heirloom_store::plans::plan_require(&conn, plan_id)
                .unwrap()
                .verification_fail_count,
            2
        );

        let token = heirloom_store::plans::plan_require(&conn, plan_id)
            .unwrap()
            .verification_token
            .unwrap();
        m.record_check_in(&conn, &t.activity, plan_id, &token, 1000 + 61 * DAY)
            .unwrap();

        let plan = heirloom_store::plans::plan_require(&conn, plan_id).unwrap();
        assert_eq!(plan.verification_fail_count, 0);
        assert!(plan.verification_token.is_none());
    }

    #[tokio::test]
    async fn test_plans_without_failsafe_are_ignored() {
        let mut conn = test_conn();
        let t = TestCtx::new();
        create_lump_plan(&mut conn, i64::MAX / 2, 0);

        let summary = monitor().run_pass(&conn, &t.ctx(), 1000).await.unwrap();
        assert_eq!(summary, PolSummary::default());
        assert!(t.notifier.sent_log().is_empty());
    }
}
