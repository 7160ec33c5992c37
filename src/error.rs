use thiserror::Error;

use crate::address::Address;
use crate::config::ConfigError;
use crate::node::NodeError;
use crate::plugin::PluginError;
use crate::vault::VaultError;

/// Authentication failures. Always surfaced to the operator, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Wrong password")]
    WrongPassword,
    #[error("Cancelled by user")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("Unknown address: {0}")]
    Address(Address),
    #[error("Unknown name: {0}")]
    Name(String),
    #[error("Plugin not loaded: {0}")]
    Plugin(String),
}

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error("Vault error: {0}")]
    Vault(VaultError),
    #[error("Node error: {0}")]
    Node(#[from] NodeError),
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Controller stopped")]
    Stopped,
}

impl From<VaultError> for ConsoleError {
    // Flatten so callers can match on auth/not-found regardless of origin.
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Auth(e) => ConsoleError::Auth(e),
            VaultError::NotFound(a) => ConsoleError::NotFound(NotFoundError::Address(a)),
            other => ConsoleError::Vault(other),
        }
    }
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;
