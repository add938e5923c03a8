//! Credential Vault
//!
//! Authenticated encryption of per-landlord gateway credentials before they
//! are written to the database, and decryption right before use.
//!
//! Stored format: `base64(nonce[12] || ciphertext || tag[16])`, with a fresh
//! random nonce for every call to [`CredentialVault::encrypt`].
//!
//! Decryption fails closed: a blob that is not valid base64, is truncated, or
//! does not authenticate is rejected with [`VaultError::Integrity`]. There is
//! no plaintext fallback.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Minimum length of the system secret the key is derived from.
pub const MIN_SECRET_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_DERIVATION_LABEL: &[u8] = b"payment-engine/credential-vault/v1";

/// Credential vault errors
#[derive(Error, Debug)]
pub enum VaultError {
    /// The system secret is too short to derive a key from
    #[error("Credential secret must be at least {required} bytes, got {actual}")]
    KeyLength {
        /// Minimum accepted length
        required: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// The cipher refused to encrypt
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Stored blob is malformed or failed authentication
    #[error("Credential integrity check failed: {0}")]
    Integrity(String),
}

/// Result alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// AES-256-GCM vault keyed from a system-wide secret.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Build a vault from the system secret.
    ///
    /// Secrets shorter than [`MIN_SECRET_LEN`] bytes are rejected. Longer
    /// secrets are never truncated: the whole secret feeds the key derivation.
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(VaultError::KeyLength {
                required: MIN_SECRET_LEN,
                actual: secret.len(),
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(KEY_DERIVATION_LABEL);
        hasher.update(secret);
        let derived = hasher.finalize();

        let key = Key::<Aes256Gcm>::from_slice(&derived);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a credential, returning the base64 blob to persist.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let encrypted = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut data = Vec::with_capacity(NONCE_LEN + encrypted.len());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&encrypted);

        Ok(STANDARD.encode(data))
    }

    /// Decrypt a blob produced by [`CredentialVault::encrypt`].
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let data = STANDARD
            .decode(blob.trim())
            .map_err(|e| VaultError::Integrity(format!("invalid encoding: {}", e)))?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Integrity(format!(
                "ciphertext truncated ({} bytes)",
                data.len()
            )));
        }

        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        let ciphertext = &data[NONCE_LEN..];

        let decrypted = self.cipher.decrypt(nonce, ciphertext).map_err(|_| {
            warn!("Credential blob failed authentication");
            VaultError::Integrity("authentication failed".to_string())
        })?;

        String::from_utf8(decrypted)
            .map_err(|e| VaultError::Integrity(format!("invalid UTF-8: {}", e)))
    }
}
