//! Security primitives for the payment engine
//!
//! ## Credential Vault (`credential_vault`)
//! - AES-256-GCM authenticated encryption of gateway credentials at rest
//! - Key derived from a system secret of at least 32 bytes
//! - Fails closed on tampered or truncated ciphertext
//!
//! # Usage
//!
//! ```rust,no_run
//! use security::CredentialVault;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = CredentialVault::from_secret(b"a-system-secret-of-at-least-32-bytes")?;
//!
//! let stored = vault.encrypt("consumer-key")?;
//! let key = vault.decrypt(&stored)?;
//! assert_eq!(key, "consumer-key");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod credential_vault;

pub use credential_vault::{CredentialVault, VaultError};
