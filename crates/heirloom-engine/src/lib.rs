//! Heirloom engine — the inheritance distribution and claim machinery.
//!
//! - [`lifecycle`]: the plan state machine (pause, resume, cancel,
//!   mark-executed)
//! - [`claim`]: claim verification and idempotent claim completion
//! - [`proof_of_life`]: check-in prompts, miss counting, early-claim
//!   failsafe
//! - [`scheduler`]: the recurring distribution pass with per-plan locks
//! - [`external`]: traits for the escrow ledger, notifier, and activity
//!   log the engine calls out to
//!
//! The engine is stateless between passes: every decision is recomputed
//! from the store, and per-plan ordering is guarded by lock rows, not by
//! anything held in memory.

pub mod claim;
pub mod external;
pub mod lifecycle;
pub mod proof_of_life;
pub mod scheduler;

pub use claim::{
    complete_claim, eligibility, is_plan_claimable, verify_claim, Allocation, ClaimEligibility,
    ClaimRequest,
};
pub use external::{ActivityLog, EngineContext, EscrowLedger, ExternalError, Notifier};
pub use proof_of_life::{CheckInState, ProofOfLifeConfig, ProofOfLifeMonitor};
pub use scheduler::{DistributionScheduler, PassSummary, SchedulerConfig};

use heirloom_store::{PlanStatus, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("plan {0} not found")]
    PlanNotFound(i64),

    #[error("plan is not yet claimable")]
    PlanNotClaimable,

    // Deliberately generic: the same error regardless of which field
    // mismatched, so nothing can be probed one field at a time.
    #[error("invalid claim code or beneficiary details")]
    InvalidClaimCode,

    #[error("this share has already been claimed")]
    AlreadyClaimed,

    #[error("no beneficiary with that index on this plan")]
    UnknownBeneficiary,

    #[error("operation not permitted while plan is {current}")]
    InvalidState { current: PlanStatus },

    #[error("plan has at least one claimed beneficiary")]
    PartialClaimExists,

    #[error("verification token is invalid or expired")]
    InvalidVerificationToken,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("external call failed: {0}")]
    Ledger(ExternalError),

    #[error("external call timed out")]
    ExternalTimeout,
}
