//! Console controller
//!
//! Owns the node handle, key vault, prompt gate, naming registry, plugin
//! host and refresh controller, and runs the event loop that feeds
//! refreshes from timer ticks, node events and explicit requests.
//!
//! Operator-facing actions live in `actions` (node and chain) and `keys`
//! (anything touching secret material).

pub mod actions;
pub mod keys;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, ConsoleResult, NotFoundError};
use crate::gate::{ConfirmationGate, GatePolicy, PromptReceiver};
use crate::naming::{AccountNamer, NamingRegistry, OverrideNamer, VaultNamer};
use crate::network::NetworkPreferences;
use crate::node::{NodeError, NodeEvent, NodeFacade};
use crate::plugin::{BalanceWatch, PluginContext, PluginHost};
use crate::refresh::{RefreshController, RefreshSnapshot, RefreshTrigger};
use crate::scheduler::{cancelled, CancelToken, PeriodicTask};
use crate::vault::KeyVault;

/// Tracing target for operator-visible log lines.
pub const CONSOLE: &str = "helmsman::console";

const COMMAND_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Refresh(RefreshTrigger),
}

pub struct Controller {
    config: RwLock<ConsoleConfig>,
    config_path: Option<PathBuf>,
    node: Arc<dyn NodeFacade>,
    vault: Arc<dyn KeyVault>,
    gate: ConfirmationGate,
    naming: Arc<NamingRegistry>,
    vault_namer: Arc<dyn AccountNamer>,
    overrides: Arc<OverrideNamer>,
    overrides_namer: Arc<dyn AccountNamer>,
    plugins: PluginHost,
    refresh: Arc<RefreshController>,
    commands: mpsc::Sender<Command>,
    command_rx: Mutex<Option<mpsc::Receiver<Command>>>,
    shutdown: CancelToken,
}

impl Controller {
    /// Wire everything together and push persisted settings into the node.
    ///
    /// The returned receiver carries operator prompts; the front end must
    /// answer them.
    pub fn new(
        config: ConsoleConfig,
        config_path: Option<PathBuf>,
        node: Arc<dyn NodeFacade>,
        vault: Arc<dyn KeyVault>,
    ) -> ConsoleResult<(Arc<Self>, PromptReceiver)> {
        let policy = Arc::new(GatePolicy::new(
            config.accounts.require_confirmation,
            config.accounts.skip_reprompt,
        ));
        let (gate, prompts) = ConfirmationGate::new(vault.clone(), policy);

        let naming = Arc::new(NamingRegistry::new());
        let vault_namer: Arc<dyn AccountNamer> = Arc::new(VaultNamer::new(vault.clone()));
        let overrides = Arc::new(OverrideNamer::with_names(config.parsed_naming_overrides()));
        let overrides_namer: Arc<dyn AccountNamer> = overrides.clone();
        naming.install(vault_namer.clone());
        naming.install(overrides_namer.clone());

        let refresh = Arc::new(RefreshController::new(
            node.clone(),
            naming.clone(),
            vault.clone(),
            config.refresh.unavailable_threshold,
        ));
        refresh.set_beneficiary(config.accounts.beneficiary);

        let plugins = PluginHost::new(
            PluginContext { naming: naming.clone(), node: node.clone() },
            refresh.clone(),
        );

        if let Err(e) = Self::apply_node_settings(node.as_ref(), &config) {
            warn!(target: CONSOLE, "Node settings not applied yet: {}", e);
        }

        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let controller = Arc::new(Self {
            config: RwLock::new(config),
            config_path,
            node,
            vault,
            gate,
            naming,
            vault_namer,
            overrides,
            overrides_namer,
            plugins,
            refresh,
            commands,
            command_rx: Mutex::new(Some(command_rx)),
            shutdown: CancelToken::new(),
        });

        if let Err(e) = controller.plugins.load_plugin::<BalanceWatch>() {
            warn!(target: CONSOLE, "{}", e);
        }
        Ok((controller, prompts))
    }

    /// Push persisted settings into the node. The node may still be coming
    /// up; the next networking toggle or settings change applies them again.
    fn apply_node_settings(node: &dyn NodeFacade, config: &ConsoleConfig) -> Result<(), NodeError> {
        node.set_network_preferences(config.net_prefs())?;
        node.set_vm_backend(config.vm)?;
        if let Some(b) = config.accounts.beneficiary {
            node.set_beneficiary(b)?;
        }
        if config.node.networking {
            node.set_networking(true)?;
        }
        Ok(())
    }

    pub fn node(&self) -> &Arc<dyn NodeFacade> {
        &self.node
    }

    pub fn vault(&self) -> &Arc<dyn KeyVault> {
        &self.vault
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    pub fn naming(&self) -> &Arc<NamingRegistry> {
        &self.naming
    }

    pub fn plugins(&self) -> &PluginHost {
        &self.plugins
    }

    pub fn refresh(&self) -> &Arc<RefreshController> {
        &self.refresh
    }

    pub fn snapshot(&self) -> Arc<RefreshSnapshot> {
        self.refresh.snapshot()
    }

    pub fn config(&self) -> ConsoleConfig {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn shutdown_token(&self) -> &CancelToken {
        &self.shutdown
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Queue a refresh on the event loop.
    pub fn request_refresh(&self, trigger: RefreshTrigger) {
        if self.commands.try_send(Command::Refresh(trigger)).is_err() {
            debug!("Refresh request dropped, queue full or loop stopped");
        }
    }

    fn spawn_refresh(&self, trigger: RefreshTrigger) {
        let refresh = self.refresh.clone();
        tokio::spawn(async move {
            refresh.request(trigger).await;
        });
    }

    /// Event loop. Returns after `shutdown()`; plugins are unloaded on exit.
    pub async fn run(self: Arc<Self>) -> ConsoleResult<()> {
        let mut commands = self
            .command_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or(ConsoleError::Stopped)?;
        let mut events = self.node.subscribe();
        let mut stop = self.shutdown.subscribe();

        let period = Duration::from_millis(self.config().refresh.interval_ms.max(10));
        let ticks = self.commands.clone();
        let ticker = PeriodicTask::spawn("refresh-tick", period, &self.shutdown, move || {
            let ticks = ticks.clone();
            async move {
                // Dropped ticks are fine, the next one catches up
                let _ = ticks.try_send(Command::Refresh(RefreshTrigger::Tick));
            }
        });

        info!(target: CONSOLE, "Console started");
        loop {
            tokio::select! {
                _ = cancelled(&mut stop) => break,
                Some(cmd) = commands.recv() => match cmd {
                    Command::Refresh(trigger) => self.spawn_refresh(trigger),
                },
                event = events.recv() => match event {
                    Ok(event) => self.on_node_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Missed {} node events", n);
                        self.spawn_refresh(RefreshTrigger::Manual);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(target: CONSOLE, "Node event stream closed");
                        events = self.node.subscribe();
                    }
                },
            }
        }

        ticker.join().await;
        self.plugins.unload_all();
        info!(target: CONSOLE, "Console stopped");
        Ok(())
    }

    fn on_node_event(&self, event: NodeEvent) {
        let trigger = match event {
            NodeEvent::NewBlock(_) => RefreshTrigger::NewBlock,
            NodeEvent::PeersChanged(_) => RefreshTrigger::NewPeer,
            NodeEvent::PendingChanged(_) => RefreshTrigger::PendingChanged,
            NodeEvent::MiningChanged(on) => {
                info!(target: CONSOLE, "Mining {}", if on { "started" } else { "stopped" });
                RefreshTrigger::Manual
            }
        };
        self.spawn_refresh(trigger);
    }

    //
    // === Naming ===
    //

    /// Name if known, else abridged hex.
    pub fn pretty(&self, address: &Address) -> String {
        self.naming.lookup_name(address).unwrap_or_else(|| address.abridged())
    }

    /// `Name (0x…)` if named, else the full hex.
    pub fn render(&self, address: &Address) -> String {
        match self.naming.lookup_name(address) {
            Some(name) => format!("{} ({})", name, address.to_hex()),
            None => address.to_hex(),
        }
    }

    /// Parse operator input: a name, a hex address, or `address:hexpayload`.
    pub fn from_string(&self, input: &str) -> ConsoleResult<(Address, Vec<u8>)> {
        let input = input.trim();
        if let Ok(address) = self.naming.resolve_address(input) {
            return Ok((address, Vec::new()));
        }
        let Some((target, payload)) = input.rsplit_once(':') else {
            return Err(NotFoundError::Name(input.to_string()).into());
        };
        let address = self.naming.resolve_address(target)?;
        let payload = hex::decode(payload.trim_start_matches("0x"))
            .map_err(|e| ConsoleError::InvalidInput(format!("bad payload: {}", e)))?;
        Ok((address, payload))
    }

    /// Give an account a display name that wins over its vault label.
    pub fn set_account_name(&self, address: Address, name: &str) -> ConsoleResult<()> {
        let name = name.trim();
        if name.is_empty() {
            self.overrides.clear(&address);
        } else {
            self.overrides.set(address, name);
        }
        self.naming.note_address_names_changed(&self.overrides_namer);
        self.update_settings(|c| {
            if name.is_empty() {
                c.accounts.naming_overrides.remove(&address.to_hex());
            } else {
                c.accounts.naming_overrides.insert(address.to_hex(), name.to_string());
            }
        })
    }

    /// Vault contents changed; republish names and balances.
    pub fn note_keys_changed(&self) {
        self.naming.note_known_addresses_changed(&self.vault_namer);
        self.request_refresh(RefreshTrigger::KeysChanged);
    }

    //
    // === Settings ===
    //

    fn update_settings(&self, f: impl FnOnce(&mut ConsoleConfig)) -> ConsoleResult<()> {
        {
            let mut config = self.config.write().unwrap_or_else(|p| p.into_inner());
            f(&mut *config);
        }
        self.note_settings_changed()
    }

    /// Write settings back to their file, if they came from one.
    pub fn note_settings_changed(&self) -> ConsoleResult<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };
        self.config().save(path)?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }

    pub fn net_prefs(&self) -> NetworkPreferences {
        self.config.read().unwrap_or_else(|p| p.into_inner()).net_prefs()
    }

    pub fn set_require_confirmation(&self, on: bool) -> ConsoleResult<()> {
        self.gate.policy().set_require_confirmation(on);
        self.update_settings(|c| c.accounts.require_confirmation = on)
    }

    pub fn set_skip_reprompt(&self, on: bool) -> ConsoleResult<()> {
        self.gate.policy().set_skip_reprompt(on);
        self.update_settings(|c| c.accounts.skip_reprompt = on)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::node::EmbeddedNode;
    use crate::vault::EncryptedKeyVault;
    use std::collections::BTreeMap;

    pub(crate) struct Harness {
        pub controller: Arc<Controller>,
        pub node: Arc<EmbeddedNode>,
        pub vault: Arc<EncryptedKeyVault>,
        pub prompts: Option<PromptReceiver>,
        pub dir: tempfile::TempDir,
    }

    pub(crate) fn harness(require_confirmation: bool, alloc: BTreeMap<Address, u64>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConsoleConfig::default();
        config.accounts.require_confirmation = require_confirmation;
        config.refresh.interval_ms = 20;
        let node = Arc::new(EmbeddedNode::new(alloc));
        let vault = Arc::new(EncryptedKeyVault::in_memory(Duration::from_secs(60)));
        let (controller, prompts) =
            Controller::new(config, Some(dir.path().join("helmsman.toml")), node.clone(), vault.clone()).unwrap();
        Harness { controller, node, vault, prompts: Some(prompts), dir }
    }

    #[test]
    fn test_starts_while_node_unavailable() {
        let mut config = ConsoleConfig::default();
        config.node.networking = true;
        let node = Arc::new(EmbeddedNode::new(BTreeMap::new()));
        node.set_available(false);
        let vault = Arc::new(EncryptedKeyVault::in_memory(Duration::from_secs(60)));

        let (controller, _prompts) = Controller::new(config, None, node.clone(), vault).unwrap();

        node.set_available(true);
        controller.set_networking(true).unwrap();
        controller.connect_peer("10.0.0.9:30303").unwrap();
        assert_eq!(node.peer_count().unwrap(), 1);
    }

    #[test]
    fn test_pretty_and_render() {
        let h = harness(false, BTreeMap::new());
        let (addr, _) = h.vault.create("savings", "pw", None).unwrap();
        h.controller.note_keys_changed();
        assert_eq!(h.controller.pretty(&addr), "savings");
        assert_eq!(h.controller.render(&addr), format!("savings ({})", addr.to_hex()));

        let stranger = Address::from_bytes([7; 20]);
        assert_eq!(h.controller.pretty(&stranger), stranger.abridged());
        assert_eq!(h.controller.render(&stranger), stranger.to_hex());
    }

    #[test]
    fn test_from_string_forms() {
        let h = harness(false, BTreeMap::new());
        let bob = Address::from_bytes([0xb0; 20]);
        h.controller.set_account_name(bob, "Bob").unwrap();

        assert_eq!(h.controller.from_string("Bob").unwrap(), (bob, vec![]));
        assert_eq!(h.controller.from_string(&bob.to_hex()).unwrap(), (bob, vec![]));
        assert_eq!(h.controller.from_string("Bob:0a0b").unwrap(), (bob, vec![0x0a, 0x0b]));
        assert!(matches!(
            h.controller.from_string("Nobody"),
            Err(ConsoleError::NotFound(NotFoundError::Name(_)))
        ));
        assert!(matches!(h.controller.from_string("Bob:zz"), Err(ConsoleError::InvalidInput(_))));
    }

    #[test]
    fn test_name_override_is_persisted() {
        let h = harness(false, BTreeMap::new());
        let bob = Address::from_bytes([0xb0; 20]);
        h.controller.set_account_name(bob, "Bob").unwrap();

        let saved = ConsoleConfig::load(&h.dir.path().join("helmsman.toml")).unwrap();
        assert_eq!(saved.accounts.naming_overrides.get(&bob.to_hex()).map(String::as_str), Some("Bob"));

        h.controller.set_account_name(bob, "").unwrap();
        assert_eq!(h.controller.naming().lookup_name(&bob), None);
    }

    #[tokio::test]
    async fn test_run_refreshes_on_ticks_and_stops() {
        let h = harness(false, BTreeMap::new());
        let controller = h.controller.clone();
        let mut snapshots = controller.refresh().subscribe();
        let handle = tokio::spawn(controller.clone().run());

        snapshots.changed().await.unwrap();
        assert!(controller.snapshot().sequence >= 1);
        assert_eq!(controller.plugins().loaded(), vec![BalanceWatch::NAME.to_string()]);

        controller.shutdown();
        handle.await.unwrap().unwrap();
        assert!(controller.plugins().loaded().is_empty());

        // Loop can only run once
        assert!(matches!(controller.clone().run().await, Err(ConsoleError::Stopped)));
    }

    #[tokio::test]
    async fn test_new_block_triggers_refresh() {
        let h = harness(false, BTreeMap::new());
        h.node.set_mining_flags(true, false).unwrap();
        h.node.start_mining().unwrap();
        let controller = h.controller.clone();
        let mut snapshots = controller.refresh().subscribe();
        let handle = tokio::spawn(controller.clone().run());

        h.node.mine_once();
        // A snapshot taken after the event sees the new block
        loop {
            snapshots.changed().await.unwrap();
            if snapshots.borrow_and_update().block_count >= 2 {
                break;
            }
        }
        controller.shutdown();
        handle.await.unwrap().unwrap();
    }
}
