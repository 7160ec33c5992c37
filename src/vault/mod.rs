//! Key vault
//!
//! Encrypted secret material for a set of addresses. The vault owns its
//! unlock cache; callers only see the `KeyVault` contract:
//! - `unlock` with a password
//! - `retrieve` the raw secret while unlocked
//! - `list_known` addresses

pub mod cipher;
pub mod recovery;
pub mod store;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::address::Address;
use crate::error::AuthError;

pub use store::EncryptedKeyVault;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("No key for {0}")]
    NotFound(Address),
    #[error("Key for {0} is locked")]
    Locked(Address),
    #[error("Key already present for {0}")]
    AlreadyExists(Address),
    #[error("Crypto failure: {0}")]
    Crypto(String),
    #[error("Vault I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Vault file corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Raw key bytes for one address. Zeroed on drop, never printed.
pub struct Secret {
    address: Address,
    bytes: Zeroizing<Vec<u8>>,
}

impl Secret {
    pub(crate) fn new(address: Address, bytes: Vec<u8>) -> Self {
        Self { address, bytes: Zeroizing::new(bytes) }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({}, <redacted>)", self.address)
    }
}

/// Proof of a successful unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unlocked {
    pub address: Address,
    pub until: Instant,
}

pub trait KeyVault: Send + Sync {
    fn unlock(&self, address: &Address, password: &str) -> Result<Unlocked, VaultError>;

    fn retrieve(&self, address: &Address) -> Result<Secret, VaultError>;

    fn list_known(&self) -> BTreeSet<Address>;

    fn is_unlocked(&self, address: &Address) -> bool;

    fn lock(&self, address: &Address);

    fn password_hint(&self, address: &Address) -> Option<String>;

    /// Operator-chosen label stored alongside the key.
    fn label(&self, address: &Address) -> Option<String>;

    /// Create a fresh key; returns its address and recovery phrase.
    fn create(&self, label: &str, password: &str, hint: Option<&str>) -> Result<(Address, String), VaultError>;

    fn import(&self, label: &str, secret: &[u8], password: &str, hint: Option<&str>) -> Result<Address, VaultError>;

    /// Remove the key permanently.
    fn kill(&self, address: &Address) -> Result<(), VaultError>;

    /// Re-wrap one key under a new password. All-or-nothing.
    fn reencrypt(&self, address: &Address, old_password: &str, new_password: &str, hint: Option<&str>) -> Result<(), VaultError>;

    /// Re-wrap several keys in one commit. Either every entry is rewritten or none is.
    fn reencrypt_many(&self, changes: &[(Address, Zeroizing<String>)], new_password: &str, hint: Option<&str>) -> Result<(), VaultError>;
}
