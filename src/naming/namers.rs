//! Built-in namers

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use super::AccountNamer;
use crate::address::Address;
use crate::vault::KeyVault;

/// Fixed set of claims, handy for plugins.
pub struct StaticNamer {
    label: String,
    names: BTreeMap<Address, String>,
}

impl StaticNamer {
    pub fn new(label: &str, names: BTreeMap<Address, String>) -> Self {
        Self { label: label.to_string(), names }
    }
}

impl AccountNamer for StaticNamer {
    fn name(&self) -> &str {
        &self.label
    }

    fn known_addresses(&self) -> BTreeSet<Address> {
        self.names.keys().copied().collect()
    }

    fn name_of(&self, address: &Address) -> Option<String> {
        self.names.get(address).cloned()
    }
}

/// Per-account names set by the operator and persisted in settings.
#[derive(Default)]
pub struct OverrideNamer {
    names: RwLock<BTreeMap<Address, String>>,
}

impl OverrideNamer {
    pub fn with_names(names: BTreeMap<Address, String>) -> Self {
        Self { names: RwLock::new(names) }
    }

    /// Caller must follow with `note_address_names_changed`.
    pub fn set(&self, address: Address, name: &str) {
        self.names.write().unwrap_or_else(|p| p.into_inner()).insert(address, name.to_string());
    }

    pub fn clear(&self, address: &Address) -> bool {
        self.names.write().unwrap_or_else(|p| p.into_inner()).remove(address).is_some()
    }

    pub fn entries(&self) -> BTreeMap<Address, String> {
        self.names.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl AccountNamer for OverrideNamer {
    fn name(&self) -> &str {
        "overrides"
    }

    fn known_addresses(&self) -> BTreeSet<Address> {
        self.names.read().unwrap_or_else(|p| p.into_inner()).keys().copied().collect()
    }

    fn name_of(&self, address: &Address) -> Option<String> {
        self.names.read().unwrap_or_else(|p| p.into_inner()).get(address).cloned()
    }
}

/// Our own accounts, named by the labels stored in the vault.
pub struct VaultNamer {
    vault: Arc<dyn KeyVault>,
}

impl VaultNamer {
    pub fn new(vault: Arc<dyn KeyVault>) -> Self {
        Self { vault }
    }
}

impl AccountNamer for VaultNamer {
    fn name(&self) -> &str {
        "vault"
    }

    fn known_addresses(&self) -> BTreeSet<Address> {
        self.vault.list_known()
    }

    fn name_of(&self, address: &Address) -> Option<String> {
        self.vault.label(address).filter(|l| !l.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NamingRegistry;
    use crate::vault::EncryptedKeyVault;
    use std::time::Duration;

    #[test]
    fn test_override_beats_vault_label() {
        let vault = Arc::new(EncryptedKeyVault::in_memory(Duration::from_secs(60)));
        let (addr, _) = vault.create("savings", "pw", None).unwrap();

        let reg = NamingRegistry::new();
        reg.install(Arc::new(VaultNamer::new(vault.clone())));
        assert_eq!(reg.resolve_name(&addr), "savings");

        let overrides = Arc::new(OverrideNamer::default());
        let as_namer: Arc<dyn AccountNamer> = overrides.clone();
        reg.install(as_namer.clone());
        overrides.set(addr, "Rainy Day");
        reg.note_address_names_changed(&as_namer);
        assert_eq!(reg.resolve_name(&addr), "Rainy Day");

        assert!(overrides.clear(&addr));
        reg.note_address_names_changed(&as_namer);
        assert_eq!(reg.resolve_name(&addr), "savings");
    }
}
