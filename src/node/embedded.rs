//! In-process node: a local chain of transfer blocks with a toy miner.
//!
//! Enough chain to drive the console end to end. Blocks are produced
//! locally while mining is on; there is no consensus.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::{MiningStatus, NodeError, NodeEvent, NodeFacade};
use crate::address::Address;
use crate::block::{Block, SignedTransaction};
use crate::config::VmBackend;
use crate::network::NetworkPreferences;

pub const BLOCK_REWARD: u64 = 5_000;
const EVENT_BUFFER: usize = 256;

struct ChainState {
    blocks: Vec<Block>,
    balances: HashMap<Address, u64>,
    nonces: HashMap<Address, u64>,
    pending: Vec<SignedTransaction>,
    peers: BTreeSet<String>,
    prefs: NetworkPreferences,
    networking: bool,
    mining: bool,
    force_mining: bool,
    turbo: bool,
    beneficiary: Option<Address>,
    vm: VmBackend,
    available: bool,
}

pub struct EmbeddedNode {
    genesis_alloc: BTreeMap<Address, u64>,
    state: Mutex<ChainState>,
    events: broadcast::Sender<NodeEvent>,
}

impl EmbeddedNode {
    pub fn new(genesis_alloc: BTreeMap<Address, u64>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let state = ChainState {
            blocks: vec![Block::genesis()],
            balances: genesis_alloc.iter().map(|(a, v)| (*a, *v)).collect(),
            nonces: HashMap::new(),
            pending: Vec::new(),
            peers: BTreeSet::new(),
            prefs: NetworkPreferences::default(),
            networking: false,
            mining: false,
            force_mining: false,
            turbo: false,
            beneficiary: None,
            vm: VmBackend::default(),
            available: true,
        };
        Self { genesis_alloc, state: Mutex::new(state), events }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fails with `Unavailable` while the node is starting or reorganizing.
    fn ready(&self) -> Result<MutexGuard<'_, ChainState>, NodeError> {
        let state = self.state();
        if !state.available {
            return Err(NodeError::Unavailable("node not ready".to_string()));
        }
        Ok(state)
    }

    fn emit(&self, event: NodeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Take the node offline (`false`) or back online.
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn head(&self) -> Block {
        let state = self.state();
        state.blocks.last().cloned().unwrap_or_else(Block::genesis)
    }

    pub fn vm_backend(&self) -> VmBackend {
        self.state().vm
    }

    pub fn network_preferences(&self) -> NetworkPreferences {
        self.state().prefs.clone()
    }

    fn apply(state: &mut ChainState, tx: &SignedTransaction) -> Result<(), NodeError> {
        let req = &tx.request;
        let expected = state.nonces.get(&req.from).copied().unwrap_or(0);
        if req.nonce != expected {
            return Err(NodeError::Rejected(format!("bad nonce {} (expected {})", req.nonce, expected)));
        }
        let from_balance = state.balances.get(&req.from).copied().unwrap_or(0);
        if from_balance < req.value {
            return Err(NodeError::Rejected(format!("insufficient funds: {} < {}", from_balance, req.value)));
        }
        state.balances.insert(req.from, from_balance - req.value);
        *state.balances.entry(req.to).or_insert(0) += req.value;
        state.nonces.insert(req.from, expected + 1);
        Ok(())
    }

    fn apply_block(state: &mut ChainState, block: &Block) -> Result<(), NodeError> {
        for tx in &block.transactions {
            if !tx.verify() {
                return Err(NodeError::InvalidBlock(format!("bad signature on {}", tx.hash())));
            }
            Self::apply(state, tx)?;
        }
        if let Some(b) = block.beneficiary {
            *state.balances.entry(b).or_insert(0) += BLOCK_REWARD;
        }
        Ok(())
    }

    // Recompute balances and nonces from genesis over `blocks`.
    fn replay(&self, state: &mut ChainState) {
        state.balances = self.genesis_alloc.iter().map(|(a, v)| (*a, *v)).collect();
        state.nonces.clear();
        let blocks = std::mem::take(&mut state.blocks);
        for block in blocks.iter().skip(1) {
            if let Err(e) = Self::apply_block(state, block) {
                warn!("Replay stopped at block {}: {}", block.number, e);
                break;
            }
        }
        state.blocks = blocks;
    }

    /// Seal pending transactions into a new block.
    ///
    /// Does nothing unless mining is on and there is work (or force mining).
    pub fn mine_once(&self) -> Option<u64> {
        let mut state = self.state();
        if !state.available || !state.mining || (state.pending.is_empty() && !state.force_mining) {
            return None;
        }
        let parent = state.blocks.last().map(|b| b.hash.clone()).unwrap_or_default();
        let number = state.blocks.len() as u64;

        let mut included = Vec::new();
        for tx in std::mem::take(&mut state.pending) {
            match Self::apply(&mut state, &tx) {
                Ok(()) => included.push(tx),
                Err(e) => debug!("Miner: dropping {}: {}", tx.hash(), e),
            }
        }
        let beneficiary = state.beneficiary;
        if let Some(b) = beneficiary {
            *state.balances.entry(b).or_insert(0) += BLOCK_REWARD;
        }
        let block = Block::new(number, parent, beneficiary, included);
        info!("⛏️  Mined block #{} ({} txs)", number, block.transactions.len());
        state.blocks.push(block);
        drop(state);

        self.emit(NodeEvent::NewBlock(number + 1));
        self.emit(NodeEvent::PendingChanged(0));
        Some(number)
    }

    /// Background miner; stops when `shutdown` flips to true.
    pub fn spawn_miner(self: &Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                let turbo = node.state().turbo;
                let pause = if turbo { interval / 10 } else { interval };
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {
                        node.mine_once();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Miner stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl NodeFacade for EmbeddedNode {
    fn current_block_count(&self) -> Result<u64, NodeError> {
        Ok(self.ready()?.blocks.len() as u64)
    }

    fn peer_count(&self) -> Result<usize, NodeError> {
        Ok(self.ready()?.peers.len())
    }

    fn is_mining(&self) -> Result<bool, NodeError> {
        Ok(self.ready()?.mining)
    }

    fn mining_status(&self) -> Result<MiningStatus, NodeError> {
        let s = self.ready()?;
        Ok(MiningStatus {
            mining: s.mining,
            force: s.force_mining,
            turbo: s.turbo,
            pending: s.pending.len(),
        })
    }

    fn balance_of(&self, address: &Address) -> Result<u64, NodeError> {
        Ok(self.ready()?.balances.get(address).copied().unwrap_or(0))
    }

    fn nonce_of(&self, address: &Address) -> Result<u64, NodeError> {
        let s = self.ready()?;
        let confirmed = s.nonces.get(address).copied().unwrap_or(0);
        let queued = s.pending.iter().filter(|t| t.request.from == *address).count() as u64;
        Ok(confirmed + queued)
    }

    fn submit_transaction(&self, tx: SignedTransaction) -> Result<String, NodeError> {
        if !tx.verify() {
            return Err(NodeError::Rejected("invalid signature".to_string()));
        }
        let hash = tx.hash();
        let pending = {
            let mut s = self.ready()?;
            if s.pending.iter().any(|p| p.hash() == hash) {
                return Err(NodeError::Rejected("already pending".to_string()));
            }
            s.pending.push(tx);
            s.pending.len()
        };
        self.emit(NodeEvent::PendingChanged(pending));
        Ok(hash)
    }

    fn set_network_preferences(&self, prefs: NetworkPreferences) -> Result<(), NodeError> {
        let mut s = self.state();
        info!("Network: listen {} (private: {:?})", prefs.listen_addr(), prefs.private_chain);
        s.prefs = prefs;
        Ok(())
    }

    fn set_networking(&self, on: bool) -> Result<(), NodeError> {
        let peers = {
            let mut s = self.ready()?;
            s.networking = on;
            if on {
                let servers = s.prefs.servers.clone();
                s.peers.extend(servers);
            } else {
                s.peers.clear();
            }
            s.peers.len()
        };
        self.emit(NodeEvent::PeersChanged(peers));
        Ok(())
    }

    fn is_networking(&self) -> Result<bool, NodeError> {
        Ok(self.ready()?.networking)
    }

    fn connect_peer(&self, peer: &str) -> Result<(), NodeError> {
        let peers = {
            let mut s = self.ready()?;
            if !s.networking {
                return Err(NodeError::Rejected("networking is off".to_string()));
            }
            s.peers.insert(peer.to_string());
            s.peers.len()
        };
        self.emit(NodeEvent::PeersChanged(peers));
        Ok(())
    }

    fn start_mining(&self) -> Result<(), NodeError> {
        self.ready()?.mining = true;
        self.emit(NodeEvent::MiningChanged(true));
        Ok(())
    }

    fn stop_mining(&self) -> Result<(), NodeError> {
        self.ready()?.mining = false;
        self.emit(NodeEvent::MiningChanged(false));
        Ok(())
    }

    fn set_mining_flags(&self, force: bool, turbo: bool) -> Result<(), NodeError> {
        let mut s = self.ready()?;
        s.force_mining = force;
        s.turbo = turbo;
        Ok(())
    }

    fn set_beneficiary(&self, address: Address) -> Result<(), NodeError> {
        self.state().beneficiary = Some(address);
        Ok(())
    }

    fn inject_block(&self, bytes: &[u8]) -> Result<u64, NodeError> {
        let block = Block::decode(bytes).map_err(NodeError::InvalidBlock)?;
        let number = {
            let mut s = self.ready()?;
            let head = s.blocks.last().cloned().unwrap_or_else(Block::genesis);
            if block.parent_hash != head.hash || block.number != head.number + 1 {
                return Err(NodeError::InvalidBlock(format!(
                    "block #{} does not extend head #{}",
                    block.number, head.number
                )));
            }
            if block.hash != block.calculate_hash() {
                return Err(NodeError::InvalidBlock("hash mismatch".to_string()));
            }
            // A bad transaction must leave no trace
            let saved = (s.balances.clone(), s.nonces.clone());
            if let Err(e) = Self::apply_block(&mut s, &block) {
                (s.balances, s.nonces) = saved;
                return Err(e);
            }
            let number = block.number;
            s.blocks.push(block);
            number
        };
        self.emit(NodeEvent::NewBlock(number + 1));
        Ok(number)
    }

    fn rewind_chain(&self, block_number: u64) -> Result<(), NodeError> {
        let count = {
            let mut s = self.ready()?;
            let keep = (block_number as usize).saturating_add(1).max(1);
            if keep >= s.blocks.len() {
                return Ok(());
            }
            s.blocks.truncate(keep);
            self.replay(&mut s);
            s.blocks.len() as u64
        };
        info!("Chain rewound to #{}", count - 1);
        self.emit(NodeEvent::NewBlock(count));
        Ok(())
    }

    fn clear_pending(&self) -> Result<usize, NodeError> {
        let dropped = std::mem::take(&mut self.ready()?.pending).len();
        self.emit(NodeEvent::PendingChanged(0));
        Ok(dropped)
    }

    fn kill_blockchain(&self) -> Result<(), NodeError> {
        {
            let mut s = self.ready()?;
            s.blocks.truncate(1);
            s.pending.clear();
            self.replay(&mut s);
        }
        warn!("Blockchain wiped back to genesis");
        self.emit(NodeEvent::NewBlock(1));
        Ok(())
    }

    fn set_vm_backend(&self, vm: VmBackend) -> Result<(), NodeError> {
        self.state().vm = vm;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }
}
