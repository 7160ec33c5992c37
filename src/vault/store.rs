//! File-backed vault: one encrypted entry per address

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::cipher::{decrypt_data, encrypt_data, hash_password, random_salt, verify_password};
use super::{recovery, KeyVault, Secret, Unlocked, VaultError};
use crate::address::Address;
use crate::crypto::KeyPair;

const VAULT_FORMAT: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug)]
struct KeyEntry {
    label: String,
    #[serde(default)]
    hint: Option<String>,
    password_hash: String, // Argon2id PHC string
    salt: Vec<u8>,
    ciphertext: Vec<u8>, // nonce || AES-256-GCM(secret)
    public_key: String,
}

#[derive(Serialize, Deserialize, Default)]
struct VaultFile {
    format: u32,
    keys: BTreeMap<Address, KeyEntry>,
}

struct UnlockedKey {
    secret: Zeroizing<Vec<u8>>,
    until: Instant,
}

pub struct EncryptedKeyVault {
    path: Option<PathBuf>,
    ttl: Duration,
    entries: Mutex<BTreeMap<Address, KeyEntry>>,
    unlocked: Mutex<HashMap<Address, UnlockedKey>>,
}

impl EncryptedKeyVault {
    /// Vault that never touches disk
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            path: None,
            ttl,
            entries: Mutex::new(BTreeMap::new()),
            unlocked: Mutex::new(HashMap::new()),
        }
    }

    /// Open the vault file at `path`, starting empty if it does not exist yet.
    pub fn open(path: &Path, ttl: Duration) -> Result<Self, VaultError> {
        let entries = if path.exists() {
            let data = std::fs::read(path)?;
            let file: VaultFile = serde_json::from_slice(&data)?;
            if file.format != VAULT_FORMAT {
                warn!("Vault format {} at {} (expected {})", file.format, path.display(), VAULT_FORMAT);
            }
            info!("Vault: loaded {} keys from {}", file.keys.len(), path.display());
            file.keys
        } else {
            info!("Vault: no key file at {}, starting empty", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            ttl,
            entries: Mutex::new(entries),
            unlocked: Mutex::new(HashMap::new()),
        })
    }

    pub fn lock_all(&self) {
        self.cache().clear();
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<Address, KeyEntry>> {
        // A poisoned map is still structurally valid; keep serving it.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<Address, UnlockedKey>> {
        self.unlocked.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Stage a mutation on a copy, persist it, then swap it in.
    fn commit<T>(
        &self,
        apply: impl FnOnce(&mut BTreeMap<Address, KeyEntry>) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let mut guard = self.entries();
        let mut staged = guard.clone();
        let out = apply(&mut staged)?;
        self.persist(&staged)?;
        *guard = staged;
        Ok(out)
    }

    fn persist(&self, keys: &BTreeMap<Address, KeyEntry>) -> Result<(), VaultError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = VaultFile { format: VAULT_FORMAT, keys: keys.clone() };
        let data = serde_json::to_vec_pretty(&file)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        debug!("Vault: persisted {} keys", keys.len());
        Ok(())
    }

    fn seal(label: &str, secret: &[u8], password: &str, hint: Option<&str>) -> Result<(Address, KeyEntry), VaultError> {
        let keypair = KeyPair::from_secret_bytes(secret).map_err(VaultError::Crypto)?;
        let salt = random_salt();
        let entry = KeyEntry {
            label: label.to_string(),
            hint: hint.map(str::to_string),
            password_hash: hash_password(password)?,
            ciphertext: encrypt_data(secret, password, &salt)?,
            salt,
            public_key: keypair.public_key_hex(),
        };
        Ok((keypair.address(), entry))
    }

    fn open_entry(entry: &KeyEntry, password: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        verify_password(password, &entry.password_hash)?;
        decrypt_data(&entry.ciphertext, password, &entry.salt)
    }

    fn rewrap(entry: &KeyEntry, old_password: &str, new_password: &str, hint: Option<&str>) -> Result<KeyEntry, VaultError> {
        let secret = Self::open_entry(entry, old_password)?;
        let salt = random_salt();
        Ok(KeyEntry {
            label: entry.label.clone(),
            hint: hint.map(str::to_string).or_else(|| entry.hint.clone()),
            password_hash: hash_password(new_password)?,
            ciphertext: encrypt_data(&secret, new_password, &salt)?,
            salt,
            public_key: entry.public_key.clone(),
        })
    }
}

impl KeyVault for EncryptedKeyVault {
    fn unlock(&self, address: &Address, password: &str) -> Result<Unlocked, VaultError> {
        let entry = self.entries().get(address).cloned().ok_or(VaultError::NotFound(*address))?;
        let secret = Self::open_entry(&entry, password)?;
        let until = Instant::now() + self.ttl;
        self.cache().insert(*address, UnlockedKey { secret, until });
        debug!("Vault: unlocked {} for {:?}", address, self.ttl);
        Ok(Unlocked { address: *address, until })
    }

    fn retrieve(&self, address: &Address) -> Result<Secret, VaultError> {
        if !self.entries().contains_key(address) {
            return Err(VaultError::NotFound(*address));
        }
        let mut cache = self.cache();
        match cache.get(address) {
            Some(k) if k.until > Instant::now() => Ok(Secret::new(*address, k.secret.to_vec())),
            Some(_) => {
                cache.remove(address);
                Err(VaultError::Locked(*address))
            }
            None => Err(VaultError::Locked(*address)),
        }
    }

    fn list_known(&self) -> BTreeSet<Address> {
        self.entries().keys().copied().collect()
    }

    fn is_unlocked(&self, address: &Address) -> bool {
        self.cache().get(address).map(|k| k.until > Instant::now()).unwrap_or(false)
    }

    fn lock(&self, address: &Address) {
        self.cache().remove(address);
    }

    fn password_hint(&self, address: &Address) -> Option<String> {
        self.entries().get(address).and_then(|e| e.hint.clone())
    }

    fn label(&self, address: &Address) -> Option<String> {
        self.entries().get(address).map(|e| e.label.clone())
    }

    fn create(&self, label: &str, password: &str, hint: Option<&str>) -> Result<(Address, String), VaultError> {
        let (phrase, secret) = recovery::generate()?;
        let address = self.import(label, &secret, password, hint)?;
        Ok((address, phrase))
    }

    fn import(&self, label: &str, secret: &[u8], password: &str, hint: Option<&str>) -> Result<Address, VaultError> {
        let (address, entry) = Self::seal(label, secret, password, hint)?;
        self.commit(|keys| {
            if keys.contains_key(&address) {
                return Err(VaultError::AlreadyExists(address));
            }
            keys.insert(address, entry);
            Ok(())
        })?;
        info!("Vault: stored key '{}' for {}", label, address);
        Ok(address)
    }

    fn kill(&self, address: &Address) -> Result<(), VaultError> {
        self.commit(|keys| keys.remove(address).map(|_| ()).ok_or(VaultError::NotFound(*address)))?;
        self.cache().remove(address);
        info!("Vault: killed key {}", address);
        Ok(())
    }

    fn reencrypt(&self, address: &Address, old_password: &str, new_password: &str, hint: Option<&str>) -> Result<(), VaultError> {
        self.commit(|keys| {
            let entry = keys.get(address).ok_or(VaultError::NotFound(*address))?;
            let rewrapped = Self::rewrap(entry, old_password, new_password, hint)?;
            keys.insert(*address, rewrapped);
            Ok(())
        })
    }

    fn reencrypt_many(&self, changes: &[(Address, Zeroizing<String>)], new_password: &str, hint: Option<&str>) -> Result<(), VaultError> {
        self.commit(|keys| {
            for (address, old_password) in changes {
                let entry = keys.get(address).ok_or(VaultError::NotFound(*address))?;
                let rewrapped = Self::rewrap(entry, old_password, new_password, hint)?;
                keys.insert(*address, rewrapped);
            }
            Ok(())
        })?;
        info!("Vault: re-encrypted {} keys", changes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    #[test]
    fn test_unlock_and_retrieve() {
        let vault = EncryptedKeyVault::in_memory(Duration::from_secs(60));
        let (addr, _phrase) = vault.create("main", "correct horse", Some("horse")).unwrap();

        assert!(matches!(vault.retrieve(&addr), Err(VaultError::Locked(_))));
        assert!(matches!(
            vault.unlock(&addr, "battery staple"),
            Err(VaultError::Auth(AuthError::WrongPassword))
        ));

        vault.unlock(&addr, "correct horse").unwrap();
        let secret = vault.retrieve(&addr).unwrap();
        assert_eq!(KeyPair::from_secret_bytes(secret.expose()).unwrap().address(), addr);
        assert_eq!(vault.password_hint(&addr).as_deref(), Some("horse"));

        vault.lock(&addr);
        assert!(matches!(vault.retrieve(&addr), Err(VaultError::Locked(_))));
    }

    #[test]
    fn test_unlock_expires() {
        let vault = EncryptedKeyVault::in_memory(Duration::from_millis(0));
        let (addr, _) = vault.create("short", "pw", None).unwrap();
        vault.unlock(&addr, "pw").unwrap();
        assert!(!vault.is_unlocked(&addr));
        assert!(matches!(vault.retrieve(&addr), Err(VaultError::Locked(_))));
    }

    #[test]
    fn test_unknown_address() {
        let vault = EncryptedKeyVault::in_memory(Duration::from_secs(60));
        let addr = Address::from_bytes([7; 20]);
        assert!(matches!(vault.retrieve(&addr), Err(VaultError::NotFound(_))));
        assert!(matches!(vault.unlock(&addr, "x"), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_reencrypt_many_is_all_or_nothing() {
        let vault = EncryptedKeyVault::in_memory(Duration::from_secs(60));
        let (a, _) = vault.create("a", "pa", None).unwrap();
        let (b, _) = vault.create("b", "pb", None).unwrap();
        let pw = |s: &str| Zeroizing::new(s.to_string());

        // Wrong password for `b` aborts the whole batch
        let err = vault.reencrypt_many(&[(a, pw("pa")), (b, pw("nope"))], "shared", None).unwrap_err();
        assert!(matches!(err, VaultError::Auth(AuthError::WrongPassword)));
        assert!(vault.unlock(&a, "pa").is_ok());
        assert!(vault.unlock(&a, "shared").is_err());

        vault.reencrypt_many(&[(a, pw("pa")), (b, pw("pb"))], "shared", None).unwrap();
        assert!(vault.unlock(&a, "shared").is_ok());
        assert!(vault.unlock(&b, "shared").is_ok());
    }

    #[test]
    fn test_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let addr = {
            let vault = EncryptedKeyVault::open(&path, Duration::from_secs(60)).unwrap();
            let (addr, _) = vault.create("disk", "pw", None).unwrap();
            addr
        };

        let reopened = EncryptedKeyVault::open(&path, Duration::from_secs(60)).unwrap();
        assert!(reopened.list_known().contains(&addr));
        assert_eq!(reopened.label(&addr).as_deref(), Some("disk"));
        // Unlock state is never persisted
        assert!(!reopened.is_unlocked(&addr));

        reopened.kill(&addr).unwrap();
        let again = EncryptedKeyVault::open(&path, Duration::from_secs(60)).unwrap();
        assert!(again.list_known().is_empty());
    }
}
