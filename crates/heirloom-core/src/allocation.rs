//! Beneficiary allocation validation
//!
//! Pure checks over basis-point allocations and periodic percentages,
//! plus the amount-splitting helpers that keep plan totals exact.

use thiserror::Error;

/// Total allocation a plan must account for, in basis points (100%).
pub const TOTAL_ALLOCATION_BP: u32 = 10_000;

/// Minimum beneficiaries per plan.
pub const MIN_BENEFICIARIES: usize = 1;

/// Maximum beneficiaries per plan.
pub const MAX_BENEFICIARIES: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("beneficiary allocations sum to {got} bp, expected 10000")]
    PercentageMismatch { got: u32 },

    #[error("a plan needs at least one beneficiary")]
    TooFewBeneficiaries,

    #[error("a plan supports at most 10 beneficiaries, got {got}")]
    TooManyBeneficiaries { got: usize },

    #[error("beneficiary allocation must be greater than zero")]
    ZeroAllocation,

    #[error("periodic percentage {got} does not evenly divide 100")]
    InvalidPercentage { got: u8 },
}

/// Validate a beneficiary allocation set.
///
/// The set must have between 1 and 10 entries, every entry must be
/// non-zero, and the entries must sum to exactly 10000 basis points.
pub fn validate_percentages(allocations_bp: &[u32]) -> Result<(), AllocationError> {
    if allocations_bp.len() < MIN_BENEFICIARIES {
        return Err(AllocationError::TooFewBeneficiaries);
    }
    if allocations_bp.len() > MAX_BENEFICIARIES {
        return Err(AllocationError::TooManyBeneficiaries {
            got: allocations_bp.len(),
        });
    }
    if allocations_bp.iter().any(|&bp| bp == 0) {
        return Err(AllocationError::ZeroAllocation);
    }

    let sum: u32 = allocations_bp.iter().sum();
    if sum != TOTAL_ALLOCATION_BP {
        return Err(AllocationError::PercentageMismatch { got: sum });
    }
    Ok(())
}

/// Validate a per-period percentage for periodic schedules.
///
/// Returns the resulting period count. `100 % percent == 0` must hold so a
/// whole number of periods covers exactly 100% of the escrowed amount.
pub fn validate_periodic_percentage(percent: u8) -> Result<u32, AllocationError> {
    if percent == 0 || percent > 100 || 100 % percent != 0 {
        return Err(AllocationError::InvalidPercentage { got: percent });
    }
    Ok(100 / u32::from(percent))
}

/// Split `total` base units across basis-point allocations.
///
/// Each share is `total * bp / 10000` rounded down; the rounding remainder
/// is folded into the final share so the parts always sum to `total`.
pub fn split_by_allocation(total: u64, allocations_bp: &[u32]) -> Vec<u64> {
    if allocations_bp.is_empty() {
        return Vec::new();
    }

    let mut shares: Vec<u64> = allocations_bp
        .iter()
        .map(|&bp| {
            (u128::from(total) * u128::from(bp) / u128::from(TOTAL_ALLOCATION_BP)) as u64
        })
        .collect();

    let assigned: u64 = shares.iter().sum();
    let last = shares.len() - 1;
    shares[last] += total - assigned;
    shares
}

/// Split `total` base units into `parts` equal shares, remainder to the
/// final share. Used for materializing periodic distribution amounts.
pub fn split_evenly(total: u64, parts: u32) -> Vec<u64> {
    if parts == 0 {
        return Vec::new();
    }

    let base = total / u64::from(parts);
    let mut shares = vec![base; parts as usize];
    let assigned = base * u64::from(parts);
    let last = shares.len() - 1;
    shares[last] += total - assigned;
    shares
}
