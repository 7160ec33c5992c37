//! Account naming registry
//!
//! Aggregates address -> name claims from any number of installed
//! `AccountNamer`s. Precedence is last-installed-wins: a namer installed
//! later overrides earlier claims on the same address (and on the same
//! name for reverse lookups). Uninstalling it restores the earlier claims.
//!
//! Mutations are serialized by one mutex and produce a fresh
//! `NamingSnapshot` that is swapped in whole, so readers never see a
//! half-installed namer.

pub mod namers;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::debug;

use crate::address::Address;
use crate::error::NotFoundError;

pub use namers::{OverrideNamer, StaticNamer, VaultNamer};

/// A pluggable source of address -> name mappings.
pub trait AccountNamer: Send + Sync {
    /// Diagnostic label, used in logs only.
    fn name(&self) -> &str;

    fn known_addresses(&self) -> BTreeSet<Address>;

    fn name_of(&self, address: &Address) -> Option<String>;
}

/// Resolved view of all installed namers at one version.
#[derive(Debug, Default, Clone)]
pub struct NamingSnapshot {
    pub version: u64,
    names: BTreeMap<Address, String>,
    addresses: BTreeMap<String, Address>,
    known: BTreeSet<Address>,
}

impl NamingSnapshot {
    // Later namers overwrite earlier ones, which is the precedence rule.
    fn build(version: u64, namers: &[Arc<dyn AccountNamer>]) -> Self {
        let mut snap = NamingSnapshot { version, ..Default::default() };
        for namer in namers {
            for address in namer.known_addresses() {
                snap.known.insert(address);
                if let Some(name) = namer.name_of(&address) {
                    snap.names.insert(address, name.clone());
                    snap.addresses.insert(name, address);
                }
            }
        }
        snap
    }

    pub fn name_of(&self, address: &Address) -> Option<&str> {
        self.names.get(address).map(String::as_str)
    }

    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.addresses.get(name).copied()
    }

    pub fn known(&self) -> &BTreeSet<Address> {
        &self.known
    }
}

pub struct NamingRegistry {
    namers: Mutex<Vec<Arc<dyn AccountNamer>>>,
    current: RwLock<Arc<NamingSnapshot>>,
    changed: watch::Sender<u64>,
}

impl Default for NamingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamingRegistry {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            namers: Mutex::new(Vec::new()),
            current: RwLock::new(Arc::new(NamingSnapshot::default())),
            changed,
        }
    }

    /// Append a namer. Installing the same instance twice is a no-op.
    pub fn install(&self, namer: Arc<dyn AccountNamer>) {
        let mut namers = self.namers.lock().unwrap_or_else(|p| p.into_inner());
        if namers.iter().any(|n| Arc::ptr_eq(n, &namer)) {
            return;
        }
        debug!("Naming: installing '{}'", namer.name());
        namers.push(namer);
        self.republish(&namers);
    }

    /// Remove a namer by identity. Returns whether anything was removed.
    pub fn uninstall(&self, namer: &Arc<dyn AccountNamer>) -> bool {
        let mut namers = self.namers.lock().unwrap_or_else(|p| p.into_inner());
        let before = namers.len();
        namers.retain(|n| !Arc::ptr_eq(n, namer));
        if namers.len() == before {
            return false;
        }
        debug!("Naming: uninstalled '{}'", namer.name());
        self.republish(&namers);
        true
    }

    pub fn note_known_addresses_changed(&self, namer: &Arc<dyn AccountNamer>) {
        self.note_changed(namer);
    }

    pub fn note_address_names_changed(&self, namer: &Arc<dyn AccountNamer>) {
        self.note_changed(namer);
    }

    fn note_changed(&self, namer: &Arc<dyn AccountNamer>) {
        let namers = self.namers.lock().unwrap_or_else(|p| p.into_inner());
        if namers.iter().any(|n| Arc::ptr_eq(n, namer)) {
            self.republish(&namers);
        }
    }

    // Caller holds the namer lock, so snapshots are built and swapped in order.
    fn republish(&self, namers: &[Arc<dyn AccountNamer>]) {
        let version = self.changed.borrow().wrapping_add(1);
        let snapshot = Arc::new(NamingSnapshot::build(version, namers));
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = snapshot;
        self.changed.send_replace(version);
    }

    pub fn snapshot(&self) -> Arc<NamingSnapshot> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn version(&self) -> u64 {
        *self.changed.borrow()
    }

    /// Fires with the new version after every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    pub fn installed(&self) -> usize {
        self.namers.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn lookup_name(&self, address: &Address) -> Option<String> {
        self.snapshot().name_of(address).map(str::to_string)
    }

    /// Name of `address`, or its canonical hex form when nobody claims it.
    pub fn resolve_name(&self, address: &Address) -> String {
        self.lookup_name(address).unwrap_or_else(|| address.to_hex())
    }

    /// Inverse lookup. Literal hex addresses resolve to themselves.
    pub fn resolve_address(&self, name: &str) -> Result<Address, NotFoundError> {
        let name = name.trim();
        if let Some(address) = self.snapshot().address_of(name) {
            return Ok(address);
        }
        name.parse::<Address>().map_err(|_| NotFoundError::Name(name.to_string()))
    }

    pub fn all_known_addresses(&self) -> BTreeSet<Address> {
        self.snapshot().known().clone()
    }
}
