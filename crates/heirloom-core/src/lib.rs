//! Heirloom core — pure logic shared by the engine.
//!
//! Three concerns live here, all free of I/O:
//!
//! - [`allocation`]: basis-point allocation validation and amount splitting
//! - [`claimcode`]: claim-code generation, normalization, and one-way digests
//! - [`cipher`]: reversible claim-code encryption for administrative recovery
//!
//! Verification never decrypts anything. Matching a claim compares SHA-256
//! digests of normalized inputs; the cipher exists only so an owner can
//! re-display a code they generated.

pub mod allocation;
pub mod cipher;
pub mod claimcode;

pub use allocation::{
    split_by_allocation, split_evenly, validate_percentages, validate_periodic_percentage,
    AllocationError, MAX_BENEFICIARIES, MIN_BENEFICIARIES, TOTAL_ALLOCATION_BP,
};
pub use cipher::{CipherError, CipherKey};
pub use claimcode::{
    combined_digest, field_digest, generate_code, normalize_code, normalize_field, ClaimCodeError,
    CLAIM_CODE_LEN,
};
