//! Plugin host
//!
//! A plugin is built, initialized, and hands back the capabilities it
//! offers. The host wires those into the naming registry and the refresh
//! controller, and unwires them again before the plugin is finalized.
//!
//! Lifecycle per instance: Constructed -> Initialized -> Finalized -> Destroyed.

pub mod balance_watch;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

use crate::naming::{AccountNamer, NamingRegistry};
use crate::node::NodeFacade;
use crate::refresh::{RefreshController, RefreshObserver};

pub use balance_watch::BalanceWatch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin '{name}' failed to initialize: {reason}")]
    Initialize { name: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Constructed,
    Initialized,
    Finalized,
    Destroyed,
}

/// What a plugin may reach during `initialize`.
#[derive(Clone)]
pub struct PluginContext {
    pub naming: Arc<NamingRegistry>,
    pub node: Arc<dyn NodeFacade>,
}

/// Optional capabilities a plugin brings; the host registers each one.
#[derive(Default, Clone)]
pub struct Capabilities {
    pub namer: Option<Arc<dyn AccountNamer>>,
    pub observer: Option<Arc<dyn RefreshObserver>>,
}

pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn initialize(&mut self, ctx: &PluginContext) -> Result<Capabilities, PluginError>;

    /// Release resources. Called once, after capabilities are detached.
    fn finalize(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unloaded {
    Removed,
    NotLoaded,
}

struct LoadedPlugin {
    name: String,
    plugin: Box<dyn Plugin>,
    caps: Capabilities,
}

#[derive(Default)]
struct HostState {
    /// Load order, oldest first
    live: Vec<LoadedPlugin>,
    states: HashMap<String, PluginState>,
}

pub struct PluginHost {
    ctx: PluginContext,
    refresh: Arc<RefreshController>,
    inner: Mutex<HostState>,
}

impl PluginHost {
    pub fn new(ctx: PluginContext, refresh: Arc<RefreshController>) -> Self {
        Self { ctx, refresh, inner: Mutex::new(HostState::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn load_plugin<P: Plugin + Default + 'static>(&self) -> Result<(), PluginError> {
        self.load(Box::new(P::default()))
    }

    /// Initialize `plugin` and register its capabilities.
    ///
    /// A live plugin with the same name is unloaded first. If initialization
    /// fails the new instance is finalized and dropped; nothing else changes.
    pub fn load(&self, mut plugin: Box<dyn Plugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        let mut host = self.lock();
        if self.unload_locked(&mut host, &name) == Unloaded::Removed {
            info!("Plugin '{}' reloading", name);
        }
        host.states.insert(name.clone(), PluginState::Constructed);

        let caps = match plugin.initialize(&self.ctx) {
            Ok(caps) => caps,
            Err(e) => {
                warn!("{}", e);
                plugin.finalize();
                host.states.insert(name, PluginState::Destroyed);
                return Err(e);
            }
        };

        if let Some(namer) = &caps.namer {
            self.ctx.naming.install(namer.clone());
        }
        if let Some(observer) = &caps.observer {
            self.refresh.add_observer(observer.clone());
        }
        host.states.insert(name.clone(), PluginState::Initialized);
        info!("Plugin '{}' loaded", name);
        host.live.push(LoadedPlugin { name, plugin, caps });
        Ok(())
    }

    /// Detach, finalize and drop a plugin. Unknown names are a no-op.
    pub fn unload_plugin(&self, name: &str) -> Unloaded {
        let mut host = self.lock();
        self.unload_locked(&mut host, name)
    }

    fn unload_locked(&self, host: &mut HostState, name: &str) -> Unloaded {
        let Some(pos) = host.live.iter().position(|p| p.name == name) else {
            return Unloaded::NotLoaded;
        };
        let mut loaded = host.live.remove(pos);
        if let Some(namer) = &loaded.caps.namer {
            self.ctx.naming.uninstall(namer);
        }
        if let Some(observer) = &loaded.caps.observer {
            self.refresh.remove_observer(observer);
        }
        loaded.plugin.finalize();
        host.states.insert(loaded.name.clone(), PluginState::Finalized);
        drop(loaded);
        host.states.insert(name.to_string(), PluginState::Destroyed);
        info!("Plugin '{}' unloaded", name);
        Unloaded::Removed
    }

    /// Unload everything, newest first.
    pub fn unload_all(&self) {
        let mut host = self.lock();
        let names: Vec<String> = host.live.iter().rev().map(|p| p.name.clone()).collect();
        for name in names {
            self.unload_locked(&mut host, &name);
        }
    }

    /// Live plugin names in load order.
    pub fn loaded(&self) -> Vec<String> {
        self.lock().live.iter().map(|p| p.name.clone()).collect()
    }

    /// Last known lifecycle state; `None` if the name was never loaded.
    pub fn state_of(&self, name: &str) -> Option<PluginState> {
        self.lock().states.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::naming::StaticNamer;
    use crate::node::EmbeddedNode;
    use crate::vault::EncryptedKeyVault;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn host() -> (PluginHost, Arc<NamingRegistry>) {
        let node: Arc<dyn NodeFacade> = Arc::new(EmbeddedNode::new(BTreeMap::new()));
        let naming = Arc::new(NamingRegistry::new());
        let vault = Arc::new(EncryptedKeyVault::in_memory(Duration::from_secs(60)));
        let refresh = Arc::new(RefreshController::new(node.clone(), naming.clone(), vault, 5));
        let ctx = PluginContext { naming: naming.clone(), node };
        (PluginHost::new(ctx, refresh), naming)
    }

    #[derive(Default)]
    struct AddressBook {
        finalized: Option<Arc<AtomicUsize>>,
    }

    impl Plugin for AddressBook {
        fn name(&self) -> &str {
            "address-book"
        }

        fn initialize(&mut self, _ctx: &PluginContext) -> Result<Capabilities, PluginError> {
            let names = [(addr(0xaa), "Carol".to_string())].into_iter().collect();
            Ok(Capabilities {
                namer: Some(Arc::new(StaticNamer::new("address-book", names))),
                observer: None,
            })
        }

        fn finalize(&mut self) {
            if let Some(count) = &self.finalized {
                count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct Broken {
        finalized: Arc<AtomicUsize>,
    }

    impl Plugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn initialize(&mut self, _ctx: &PluginContext) -> Result<Capabilities, PluginError> {
            Err(PluginError::Initialize { name: "broken".to_string(), reason: "no config".to_string() })
        }

        fn finalize(&mut self) {
            self.finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_load_registers_namer() {
        let (host, naming) = host();
        host.load_plugin::<AddressBook>().unwrap();
        assert_eq!(host.loaded(), vec!["address-book".to_string()]);
        assert_eq!(host.state_of("address-book"), Some(PluginState::Initialized));
        assert_eq!(naming.resolve_name(&addr(0xaa)), "Carol");

        assert_eq!(host.unload_plugin("address-book"), Unloaded::Removed);
        assert_eq!(naming.resolve_name(&addr(0xaa)), addr(0xaa).to_hex());
        assert_eq!(host.state_of("address-book"), Some(PluginState::Destroyed));
    }

    #[test]
    fn test_unload_is_idempotent() {
        let (host, naming) = host();
        assert_eq!(host.unload_plugin("ghost"), Unloaded::NotLoaded);
        assert_eq!(host.state_of("ghost"), None);

        host.load_plugin::<AddressBook>().unwrap();
        assert_eq!(host.unload_plugin("address-book"), Unloaded::Removed);
        let version = naming.version();
        assert_eq!(host.unload_plugin("address-book"), Unloaded::NotLoaded);
        assert_eq!(naming.version(), version);
        assert!(host.loaded().is_empty());
    }

    #[test]
    fn test_reload_replaces_instance() {
        let (host, naming) = host();
        let finalized = Arc::new(AtomicUsize::new(0));
        host.load(Box::new(AddressBook { finalized: Some(finalized.clone()) })).unwrap();
        host.load(Box::new(AddressBook { finalized: Some(finalized.clone()) })).unwrap();

        assert_eq!(finalized.load(Ordering::SeqCst), 1);
        assert_eq!(host.loaded().len(), 1);
        assert_eq!(naming.installed(), 1);
    }

    #[test]
    fn test_failed_initialize_is_torn_down() {
        let (host, naming) = host();
        host.load_plugin::<AddressBook>().unwrap();

        let finalized = Arc::new(AtomicUsize::new(0));
        let err = host.load(Box::new(Broken { finalized: finalized.clone() })).unwrap_err();
        assert!(matches!(err, PluginError::Initialize { .. }));
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
        assert_eq!(host.state_of("broken"), Some(PluginState::Destroyed));

        // Others unaffected
        assert_eq!(host.loaded(), vec!["address-book".to_string()]);
        assert_eq!(naming.resolve_name(&addr(0xaa)), "Carol");
    }

    #[test]
    fn test_unload_all() {
        let (host, naming) = host();
        host.load_plugin::<AddressBook>().unwrap();
        host.load_plugin::<BalanceWatch>().unwrap();
        host.unload_all();
        assert!(host.loaded().is_empty());
        assert_eq!(naming.installed(), 0);
        assert_eq!(host.state_of(BalanceWatch::NAME), Some(PluginState::Destroyed));
    }
}
