//! Claim codes and identity digests
//!
//! A claim code is 6 uppercase alphanumeric characters. Beneficiary
//! identity fields (name, email, relationship) are stored as one-way
//! SHA-256 digests alongside the plaintext, and claim matching compares a
//! single combined digest over all four normalized values. Verification
//! therefore never needs the plaintext code, and a mismatch in any one
//! field is indistinguishable from a mismatch in another.

use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Claim codes are exactly this many characters.
pub const CLAIM_CODE_LEN: usize = 6;

const CLAIM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Separator between fields in the combined digest preimage. A control
/// byte that cannot appear in normalized input, so ("ab", "c") and
/// ("a", "bc") never collide.
const FIELD_SEPARATOR: u8 = 0x1f;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimCodeError {
    #[error("claim code must be 6 alphanumeric characters")]
    InvalidFormat,
}

/// Generate a fresh claim code from the uppercase alphanumeric alphabet.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CLAIM_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CLAIM_CODE_ALPHABET.len());
            CLAIM_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Normalize a claim code: trim surrounding whitespace, fold to uppercase,
/// and reject anything that is not exactly 6 alphanumeric characters.
pub fn normalize_code(code: &str) -> Result<String, ClaimCodeError> {
    let code = code.trim().to_uppercase();
    if code.len() != CLAIM_CODE_LEN
        || !code.bytes().all(|b| CLAIM_CODE_ALPHABET.contains(&b))
    {
        return Err(ClaimCodeError::InvalidFormat);
    }
    Ok(code)
}

/// Normalize an identity field: trim and case-fold.
pub fn normalize_field(field: &str) -> String {
    field.trim().to_lowercase()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// One-way digest of a normalized identity field.
pub fn field_digest(field: &str) -> String {
    sha256_hex(normalize_field(field).as_bytes())
}

/// One-way digest of a normalized claim code.
pub fn code_digest(code: &str) -> Result<String, ClaimCodeError> {
    Ok(sha256_hex(normalize_code(code)?.as_bytes()))
}

/// Combined digest over the normalized (name, email, relationship, code)
/// tuple. All four values participate; claim matching uses only this
/// digest so no partial-field match is possible.
pub fn combined_digest(
    name: &str,
    email: &str,
    relationship: &str,
    code: &str,
) -> Result<String, ClaimCodeError> {
    let code = normalize_code(code)?;

    let mut hasher = Sha256::new();
    for field in [
        normalize_field(name),
        normalize_field(email),
        normalize_field(relationship),
    ] {
        hasher.update(field.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
    }
    hasher.update(code.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}
