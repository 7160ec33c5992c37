//! Node facade
//!
//! The console talks to the embedded node only through `NodeFacade`.
//! Calls are synchronous request/response from the caller's side; any of
//! them may fail with `NodeError::Unavailable` while the node is starting
//! or reorganizing.

pub mod embedded;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::address::Address;
use crate::block::SignedTransaction;
use crate::config::VmBackend;
use crate::network::NetworkPreferences;

pub use embedded::EmbeddedNode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Node unavailable: {0}")]
    Unavailable(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
}

/// Change notifications pushed by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    NewBlock(u64),
    PeersChanged(usize),
    PendingChanged(usize),
    MiningChanged(bool),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MiningStatus {
    pub mining: bool,
    pub force: bool,
    pub turbo: bool,
    pub pending: usize,
}

pub trait NodeFacade: Send + Sync {
    fn current_block_count(&self) -> Result<u64, NodeError>;

    fn peer_count(&self) -> Result<usize, NodeError>;

    fn is_mining(&self) -> Result<bool, NodeError>;

    fn mining_status(&self) -> Result<MiningStatus, NodeError>;

    fn balance_of(&self, address: &Address) -> Result<u64, NodeError>;

    fn nonce_of(&self, address: &Address) -> Result<u64, NodeError>;

    /// Returns the transaction hash.
    fn submit_transaction(&self, tx: SignedTransaction) -> Result<String, NodeError>;

    fn set_network_preferences(&self, prefs: NetworkPreferences) -> Result<(), NodeError>;

    fn set_networking(&self, on: bool) -> Result<(), NodeError>;

    fn is_networking(&self) -> Result<bool, NodeError>;

    fn connect_peer(&self, peer: &str) -> Result<(), NodeError>;

    fn start_mining(&self) -> Result<(), NodeError>;

    fn stop_mining(&self) -> Result<(), NodeError>;

    fn set_mining_flags(&self, force: bool, turbo: bool) -> Result<(), NodeError>;

    fn set_beneficiary(&self, address: Address) -> Result<(), NodeError>;

    /// Import an encoded block on top of the head; returns its number.
    fn inject_block(&self, bytes: &[u8]) -> Result<u64, NodeError>;

    /// Drop every block above `block_number`.
    fn rewind_chain(&self, block_number: u64) -> Result<(), NodeError>;

    /// Returns the number of dropped transactions.
    fn clear_pending(&self) -> Result<usize, NodeError>;

    /// Wipe the chain back to genesis.
    fn kill_blockchain(&self) -> Result<(), NodeError>;

    fn set_vm_backend(&self, vm: VmBackend) -> Result<(), NodeError>;

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent>;
}
