//! Operator actions on the node: networking, mining and chain surgery.

use tracing::{info, warn};

use super::{Controller, CONSOLE};
use crate::address::Address;
use crate::config::VmBackend;
use crate::error::{AuthError, ConsoleResult};
use crate::refresh::{RefreshTrigger, RequestOutcome};

impl Controller {
    fn apply_net_prefs(&self) -> ConsoleResult<()> {
        self.node.set_network_preferences(self.net_prefs())?;
        Ok(())
    }

    /// Turn networking on or off ("go" / "net").
    pub fn set_networking(&self, on: bool) -> ConsoleResult<()> {
        if on {
            self.apply_net_prefs()?;
        }
        self.node.set_networking(on)?;
        info!(target: CONSOLE, "Networking {}", if on { "on" } else { "off" });
        self.update_settings(|c| c.node.networking = on)
    }

    pub fn connect_peer(&self, peer: &str) -> ConsoleResult<()> {
        let peer = peer.trim();
        self.node.connect_peer(peer)?;
        info!(target: CONSOLE, "Connecting to {}", peer);
        Ok(())
    }

    pub fn set_ideal_peers(&self, count: u32) -> ConsoleResult<()> {
        self.update_settings(|c| c.node.ideal_peers = count)?;
        self.apply_net_prefs()
    }

    /// Switch to a private chain, or back to the public one with `None`.
    pub fn set_private_chain(&self, id: Option<&str>) -> ConsoleResult<()> {
        let id = id.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        match &id {
            Some(id) => info!(target: CONSOLE, "Using private chain '{}'", id),
            None => info!(target: CONSOLE, "Using public chain"),
        }
        self.update_settings(|c| c.node.private_chain = id)?;
        self.apply_net_prefs()?;
        self.request_refresh(RefreshTrigger::Manual);
        Ok(())
    }

    /// Flip mining; returns the new state.
    pub fn toggle_mining(&self) -> ConsoleResult<bool> {
        if self.node.is_mining()? {
            self.node.stop_mining()?;
            Ok(false)
        } else {
            self.node.start_mining()?;
            Ok(true)
        }
    }

    pub fn set_mining_flags(&self, force: bool, turbo: bool) -> ConsoleResult<()> {
        self.node.set_mining_flags(force, turbo)?;
        Ok(())
    }

    /// Where block rewards go.
    pub fn set_beneficiary(&self, address: Address) -> ConsoleResult<()> {
        self.node.set_beneficiary(address)?;
        self.refresh.set_beneficiary(Some(address));
        info!(target: CONSOLE, "Beneficiary is now {}", self.render(&address));
        self.update_settings(|c| c.accounts.beneficiary = Some(address))
    }

    pub fn set_vm_backend(&self, vm: VmBackend) -> ConsoleResult<()> {
        self.node.set_vm_backend(vm)?;
        info!(target: CONSOLE, "VM backend: {:?}", vm);
        self.update_settings(|c| c.vm = vm)
    }

    pub fn inject_block(&self, bytes: &[u8]) -> ConsoleResult<u64> {
        let number = self.node.inject_block(bytes)?;
        info!(target: CONSOLE, "Injected block #{}", number);
        Ok(number)
    }

    pub async fn rewind_chain(&self, block_number: u64) -> ConsoleResult<()> {
        let message = format!("Drop every block above #{}?", block_number);
        if !self.gate.confirm("Rewind chain", &message).await {
            return Err(AuthError::Cancelled.into());
        }
        self.node.rewind_chain(block_number)?;
        Ok(())
    }

    pub async fn kill_blockchain(&self) -> ConsoleResult<()> {
        if !self.gate.confirm("Kill blockchain", "Wipe the chain back to genesis?").await {
            return Err(AuthError::Cancelled.into());
        }
        self.node.kill_blockchain()?;
        warn!(target: CONSOLE, "Blockchain killed");
        Ok(())
    }

    /// Drop all pending transactions; returns how many were dropped.
    pub fn clear_pending(&self) -> ConsoleResult<usize> {
        let dropped = self.node.clear_pending()?;
        info!(target: CONSOLE, "Cleared {} pending transactions", dropped);
        Ok(dropped)
    }

    /// Refresh now and wait for it, unless a pass is already running.
    pub async fn refresh_now(&self) -> RequestOutcome {
        self.refresh.request(RefreshTrigger::Manual).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::harness;
    use crate::config::{ConsoleConfig, VmBackend};
    use crate::error::{AuthError, ConsoleError};
    use crate::gate::testing::{answer_with, Answer};
    use crate::node::NodeFacade;
    use crate::address::Address;
    use std::collections::BTreeMap;

    #[test]
    fn test_settings_reach_node_and_disk() {
        let h = harness(false, BTreeMap::new());
        let c = &h.controller;
        c.set_private_chain(Some("lab-net")).unwrap();
        c.set_ideal_peers(3).unwrap();
        c.set_vm_backend(VmBackend::Interpreter).unwrap();

        let prefs = h.node.network_preferences();
        assert_eq!(prefs.private_chain.as_deref(), Some("lab-net"));
        assert_eq!(prefs.ideal_peers, 3);
        assert_eq!(h.node.vm_backend(), VmBackend::Interpreter);

        let saved = ConsoleConfig::load(&h.dir.path().join("helmsman.toml")).unwrap();
        assert_eq!(saved.node.private_chain.as_deref(), Some("lab-net"));
        assert_eq!(saved.vm, VmBackend::Interpreter);

        c.set_private_chain(Some("  ")).unwrap();
        assert!(!h.node.network_preferences().is_private());
    }

    #[test]
    fn test_toggle_mining_and_beneficiary() {
        let h = harness(false, BTreeMap::new());
        let c = &h.controller;
        assert!(c.toggle_mining().unwrap());
        assert!(h.node.is_mining().unwrap());
        assert!(!c.toggle_mining().unwrap());

        let reward_to = Address::from_bytes([0xee; 20]);
        c.set_beneficiary(reward_to).unwrap();
        c.set_mining_flags(true, false).unwrap();
        c.toggle_mining().unwrap();
        h.node.mine_once();
        assert!(h.node.balance_of(&reward_to).unwrap() > 0);
        assert_eq!(c.config().accounts.beneficiary, Some(reward_to));
    }

    #[test]
    fn test_networking_and_peers() {
        let h = harness(false, BTreeMap::new());
        let c = &h.controller;
        assert!(matches!(c.connect_peer("10.0.0.9:30303"), Err(ConsoleError::Node(_))));
        c.set_networking(true).unwrap();
        c.connect_peer("10.0.0.9:30303").unwrap();
        assert_eq!(h.node.peer_count().unwrap(), 1);
        assert!(c.config().node.networking);
    }

    #[tokio::test]
    async fn test_declined_kill_blockchain_keeps_chain() {
        let mut h = harness(true, BTreeMap::new());
        let _seen = answer_with(h.prompts.take().unwrap(), vec![Answer::No]);
        h.node.set_mining_flags(true, false).unwrap();
        h.node.start_mining().unwrap();
        h.node.mine_once();

        let err = h.controller.kill_blockchain().await.unwrap_err();
        assert!(matches!(err, ConsoleError::Auth(AuthError::Cancelled)));
        assert_eq!(h.node.current_block_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rewind_and_clear_pending_without_confirmation() {
        let h = harness(false, BTreeMap::new());
        h.node.set_mining_flags(true, false).unwrap();
        h.node.start_mining().unwrap();
        h.node.mine_once();
        h.node.mine_once();

        h.controller.rewind_chain(0).await.unwrap();
        assert_eq!(h.node.current_block_count().unwrap(), 1);
        assert_eq!(h.controller.clear_pending().unwrap(), 0);
    }
}
