//! Row types and enumerations.
//!
//! Enums are stored as lowercase TEXT and implement the rusqlite
//! conversion traits so queries stay typed end to end.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

/// Plan lifecycle status. CANCELLED, EXPIRED, and EXECUTED are terminal
/// markers; plans are never physically deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
    Executed,
}

text_enum!(PlanStatus {
    Active => "active",
    Paused => "paused",
    Cancelled => "cancelled",
    Expired => "expired",
    Executed => "executed",
});

impl PlanStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired | Self::Executed)
    }
}

/// How the plan pays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMethod {
    LumpSum,
    Monthly,
    Quarterly,
    Yearly,
}

text_enum!(DistributionMethod {
    LumpSum => "lump_sum",
    Monthly => "monthly",
    Quarterly => "quarterly",
    Yearly => "yearly",
});

impl DistributionMethod {
    /// Calendar months between periods, `None` for lump sum.
    pub fn period_months(&self) -> Option<u32> {
        match self {
            Self::LumpSum => None,
            Self::Monthly => Some(1),
            Self::Quarterly => Some(3),
            Self::Yearly => Some(12),
        }
    }
}

/// Supported asset classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Strk,
    Usdt,
    Usdc,
    Nft,
}

text_enum!(AssetType {
    Strk => "strk",
    Usdt => "usdt",
    Usdc => "usdc",
    Nft => "nft",
});

/// Status of one scheduled distribution period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Pending,
    Notified,
    Executed,
    Failed,
    Cancelled,
}

text_enum!(DistributionStatus {
    Pending => "pending",
    Notified => "notified",
    Executed => "executed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl DistributionStatus {
    /// Still waiting to execute (the scheduler may act on it).
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Notified)
    }
}

/// A stored plan.
#[derive(Debug, Clone)]
pub struct PlanRow {
    pub id: i64,
    pub chain_plan_id: Option<i64>,
    pub owner_plan_id: Option<i64>,
    pub tx_hash: Option<String>,
    pub owner_email: String,
    pub name: String,
    pub description: String,
    pub asset_type: AssetType,
    /// Human-readable decimal amount, e.g. "1000.00".
    pub total_display: String,
    /// Escrowed amount in integer base units (net of the creation fee).
    pub total_units: u64,
    pub method: DistributionMethod,
    pub periodic_percent: Option<u8>,
    /// Lump-sum transfer date (unix seconds).
    pub transfer_date: Option<i64>,
    /// First period date for periodic plans.
    pub start_date: Option<i64>,
    /// Final period date for periodic plans.
    pub end_date: Option<i64>,
    pub proof_of_life_enabled: bool,
    pub early_claim_enabled: bool,
    /// Single-use check-in token, rotated on every prompt.
    pub verification_token: Option<String>,
    pub last_verification_sent: Option<i64>,
    pub last_verification_at: Option<i64>,
    pub verification_fail_count: u32,
    /// When claim codes were delivered to beneficiaries (lump-sum plans).
    pub claim_codes_sent_at: Option<i64>,
    pub status: PlanStatus,
    pub is_claimed_fully: bool,
    pub created_at: i64,
}

/// A stored beneficiary. Identity fields are kept both in plaintext (for
/// notification delivery) and as one-way digests (for claim matching).
#[derive(Debug, Clone)]
pub struct BeneficiaryRow {
    pub plan_id: i64,
    pub beneficiary_index: u32,
    pub name: String,
    pub email: String,
    pub relationship: String,
    pub name_hash: String,
    pub email_hash: String,
    pub relationship_hash: String,
    pub combined_hash: String,
    pub claim_code_cipher: String,
    pub claim_code_hash: String,
    pub allocation_bp: u32,
    pub allocated_units: u64,
    pub has_claimed: bool,
    pub claimed_at: Option<i64>,
    pub claimed_by_address: Option<String>,
    pub claimed_units: Option<u64>,
    pub claim_tx_hash: Option<String>,
}

/// One materialized distribution period.
#[derive(Debug, Clone)]
pub struct DistributionRow {
    pub plan_id: i64,
    /// 1-based, unique per plan, strictly increasing in scheduled date.
    pub period_number: u32,
    pub units: u64,
    pub scheduled_date: i64,
    pub status: DistributionStatus,
    pub executed_at: Option<i64>,
    pub tx_hash: Option<String>,
    pub attempts: u32,
}

/// The escrow record backing a plan.
#[derive(Debug, Clone)]
pub struct EscrowRow {
    pub plan_id: i64,
    pub locked_units: u64,
    pub locked_at: i64,
    pub fee_bp: u32,
    pub fee_units: u64,
    pub release_conditions: u32,
    pub released_units: u64,
    pub refunded_at: Option<i64>,
}

impl EscrowRow {
    pub fn remaining_units(&self) -> u64 {
        self.locked_units.saturating_sub(self.released_units)
    }
}

/// Schedule selection for a new plan.
#[derive(Debug, Clone)]
pub enum Schedule {
    LumpSum {
        transfer_date: i64,
    },
    Periodic {
        method: DistributionMethod,
        /// Percentage released per period; must evenly divide 100.
        percent: u8,
        /// First period date (unix seconds).
        start_date: i64,
    },
}

/// Input for plan creation. Amounts are the gross amount the owner
/// escrows; the creation fee is deducted at the write boundary.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub name: String,
    pub description: String,
    pub owner_email: String,
    pub asset_type: AssetType,
    pub total_display: String,
    pub total_units: u64,
    pub schedule: Schedule,
    pub proof_of_life_enabled: bool,
    pub early_claim_enabled: bool,
    pub chain_plan_id: Option<i64>,
    pub owner_plan_id: Option<i64>,
    pub tx_hash: Option<String>,
}

/// Input for one beneficiary. The claim code arrives in plaintext and is
/// hashed plus encrypted at the write boundary; it is never stored bare.
#[derive(Debug, Clone)]
pub struct NewBeneficiary {
    pub name: String,
    pub email: String,
    pub relationship: String,
    pub claim_code: String,
    pub allocation_bp: u32,
}
