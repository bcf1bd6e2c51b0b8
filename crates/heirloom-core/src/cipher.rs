//! Claim-code encryption
//!
//! AES-256-GCM keyed by a process-wide secret, used only for
//! administrative recovery ("copy claim code" in the owner dashboard).
//! Verification always goes through the one-way digests in
//! [`crate::claimcode`]; nothing on the claim path decrypts.
//!
//! The key is loaded once at startup, either as raw hex or derived from a
//! passphrase with Argon2id, and rotated out-of-band.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Argon2id parameters for passphrase-derived keys
/// - m_cost: 64 MiB memory
/// - t_cost: 3 iterations
/// - p_cost: 4 parallel threads
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("invalid cipher key: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    // Tampered or corrupt ciphertext. Fatal to the request, never retried.
    #[error("decryption failed: ciphertext is corrupt or was produced under a different key")]
    DecryptionFailed,

    #[error("invalid ciphertext format")]
    InvalidFormat,
}

/// The process-wide encryption key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CipherKey([u8; KEY_LEN]);

impl CipherKey {
    /// Parse a raw 32-byte key from hex.
    pub fn from_hex(s: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Derive a key from a passphrase with Argon2id.
    ///
    /// The salt is part of the deployment configuration (it must be stable
    /// across restarts so old ciphertexts stay recoverable) and must be at
    /// least 8 bytes.
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, CipherError> {
        if salt.len() < 8 {
            return Err(CipherError::InvalidKey(
                "salt must be at least 8 bytes".into(),
            ));
        }

        let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(KEY_LEN))
            .map_err(|e| CipherError::KeyDerivationFailed(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CipherError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(key))
    }

    /// Encrypt a secret. Output is hex of `nonce || ciphertext || tag`;
    /// every call uses a fresh random nonce.
    pub fn encrypt(&self, secret: &str) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    /// Decrypt a hex ciphertext produced by [`CipherKey::encrypt`].
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String, CipherError> {
        let bytes = hex::decode(ciphertext_hex).map_err(|_| CipherError::InvalidFormat)?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::InvalidFormat);
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CipherKey {
        CipherKey::from_hex(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let ciphertext = key.encrypt("AB12CD").unwrap();
        assert_eq!(key.decrypt(&ciphertext).unwrap(), "AB12CD");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let key = test_key();
        let a = key.encrypt("AB12CD").unwrap();
        let b = key.encrypt("AB12CD").unwrap();
        assert_ne!(a, b);
        assert_eq!(key.decrypt(&a).unwrap(), key.decrypt(&b).unwrap());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let ciphertext = key.encrypt("AB12CD").unwrap();

        let mut bytes = hex::decode(&ciphertext).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = hex::encode(bytes);

        assert!(matches!(
            key.decrypt(&tampered),
            Err(CipherError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = test_key();
        let other = CipherKey::from_hex(&"cd".repeat(32)).unwrap();
        let ciphertext = key.encrypt("AB12CD").unwrap();
        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_malformed_ciphertext_rejected() {
        let key = test_key();
        assert!(matches!(
            key.decrypt("not hex"),
            Err(CipherError::InvalidFormat)
        ));
        assert!(matches!(
            key.decrypt("abcd"),
            Err(CipherError::InvalidFormat)
        ));
    }

    #[test]
    fn test_key_parsing() {
        assert!(CipherKey::from_hex(&"ab".repeat(32)).is_ok());
        assert!(CipherKey::from_hex("zz").is_err());
        assert!(CipherKey::from_hex(&"ab".repeat(16)).is_err());
    }

    #[test]
    fn test_passphrase_derivation_is_stable() {
        let a = CipherKey::from_passphrase("correct horse", b"heirloom-salt").unwrap();
        let b = CipherKey::from_passphrase("correct horse", b"heirloom-salt").unwrap();

        let ciphertext = a.encrypt("AB12CD").unwrap();
        assert_eq!(b.decrypt(&ciphertext).unwrap(), "AB12CD");

        // Different salt derives a different key
        let c = CipherKey::from_passphrase("correct horse", b"another-salt").unwrap();
        assert!(c.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_short_salt_rejected() {
        assert!(CipherKey::from_passphrase("pw", b"short").is_err());
    }
}
