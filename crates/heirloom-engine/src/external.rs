//! External collaborator contracts.
//!
//! The engine never talks to the chain, the mailer, or the audit trail
//! directly; it goes through these traits. Every async call a scheduler
//! pass makes through them is wrapped in a bounded timeout so one stuck
//! collaborator cannot stall the pass.

use crate::EngineError;
use async_trait::async_trait;
use heirloom_store::AssetType;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure of an external call, as reported by the collaborator itself.
/// Timeouts are produced by the engine's own deadline, not here.
#[derive(Error, Debug)]
pub enum ExternalError {
    /// The collaborator understood the request and said no.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The collaborator could not be reached or errored out.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// The on-chain escrow ledger. Authoritative for custody: the store only
/// mirrors state after a ledger call has succeeded.
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    /// Lock assets for a newly created plan.
    async fn lock_escrow(
        &self,
        plan_id: i64,
        asset: AssetType,
        units: u64,
    ) -> Result<(), ExternalError>;

    /// Release one beneficiary's share. Returns the transaction hash.
    async fn release_escrow(
        &self,
        plan_id: i64,
        beneficiary_index: u32,
        units: u64,
    ) -> Result<String, ExternalError>;

    /// Release one period of a periodic plan; the ledger fans the amount
    /// out across beneficiaries by their stored allocations. Returns the
    /// transaction hash.
    async fn release_distribution(
        &self,
        plan_id: i64,
        period_number: u32,
        units: u64,
    ) -> Result<String, ExternalError>;

    /// Refund the remaining escrow to the owner (plan cancellation).
    async fn refund_escrow(&self, plan_id: i64) -> Result<String, ExternalError>;
}

/// Outbound notifications. Delivery mechanics live behind this trait;
/// failures are logged and retried on later passes, never fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_claim_code(
        &self,
        email: &str,
        plan_name: &str,
        code: &str,
    ) -> Result<(), ExternalError>;

    async fn send_check_in_prompt(
        &self,
        email: &str,
        plan_name: &str,
        token: &str,
    ) -> Result<(), ExternalError>;

    async fn send_distribution_notice(
        &self,
        email: &str,
        plan_name: &str,
        period_number: u32,
        units: u64,
    ) -> Result<(), ExternalError>;

    /// Operator alert channel for conditions that need a human.
    async fn send_operator_alert(&self, message: &str) -> Result<(), ExternalError>;
}

/// Audit trail. Recording must never fail the operation being recorded;
/// implementations log their own errors.
pub trait ActivityLog: Send + Sync {
    fn record(&self, actor: &str, kind: &str, description: &str, metadata: Option<serde_json::Value>);
}

/// The engine's view of its collaborators, bundled for call sites.
pub struct EngineContext<'a> {
    pub ledger: &'a dyn EscrowLedger,
    pub notifier: &'a dyn Notifier,
    pub activity: &'a dyn ActivityLog,
}

/// Run an external call under a deadline. A timeout leaves the item in
/// its prior state; the caller decides whether to count an attempt.
pub(crate) async fn call_with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, ExternalError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(EngineError::Ledger(e)),
        Err(_) => Err(EngineError::ExternalTimeout),
    }
}
