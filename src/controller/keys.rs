//! Account actions. Everything that touches secret material goes through
//! the confirmation gate; a cancelled prompt leaves the vault untouched.

use tracing::info;
use zeroize::Zeroizing;

use super::{Controller, CONSOLE};
use crate::address::Address;
use crate::block::TransactionRequest;
use crate::crypto::KeyPair;
use crate::error::{AuthError, ConsoleError, ConsoleResult};
use crate::gate::Password;
use crate::refresh::RefreshTrigger;
use crate::vault::Secret;

impl Controller {
    /// Secret for `address`, after whatever prompting the policy asks for.
    pub async fn retrieve_secret(&self, address: &Address, purpose: &str) -> ConsoleResult<Secret> {
        self.gate.retrieve_secret(address, purpose).await
    }

    async fn ask_password(&self, title: &str, message: &str, hint: Option<String>) -> ConsoleResult<Password> {
        self.gate
            .authenticate(title, message, hint)
            .await
            .ok_or_else(|| AuthError::Cancelled.into())
    }

    /// Prompt for a new password twice; a mismatch is rejected before any
    /// key is touched.
    async fn ask_new_password(&self, title: &str, message: &str) -> ConsoleResult<Password> {
        let first = self.ask_password(title, message, None).await?;
        let again = self.ask_password(title, "Repeat the new password", None).await?;
        if first.expose() != again.expose() {
            return Err(ConsoleError::InvalidInput("passwords do not match".to_string()));
        }
        Ok(first)
    }

    /// Create a key under a freshly prompted password.
    ///
    /// Returns the address and the recovery phrase for the operator to note.
    pub async fn new_account(&self, label: &str) -> ConsoleResult<(Address, Zeroizing<String>)> {
        let password = self.ask_new_password("New account", "Choose a password for the new key").await?;
        let (address, phrase) = self.vault.create(label, password.expose(), None)?;
        info!(target: CONSOLE, "Created account {}", address);
        self.note_keys_changed();
        Ok((address, Zeroizing::new(phrase)))
    }

    /// Delete a key for good. Asks for confirmation and the key's password.
    pub async fn kill_account(&self, address: &Address) -> ConsoleResult<()> {
        if !self.vault.list_known().contains(address) {
            return Err(crate::error::NotFoundError::Address(*address).into());
        }
        let message = format!("Permanently delete the key for {}? This cannot be undone.", self.render(address));
        if !self.gate.confirm("Kill account", &message).await {
            return Err(AuthError::Cancelled.into());
        }
        self.gate
            .unlock(address, "Kill account", &format!("Enter the password for {}", self.pretty(address)))
            .await?;
        self.vault.kill(address)?;
        if self.overrides.clear(address) {
            self.set_account_name(*address, "")?;
        }
        info!(target: CONSOLE, "Killed account {}", address);
        self.note_keys_changed();
        Ok(())
    }

    /// Hex of the raw secret, for the operator to copy out.
    pub async fn export_key(&self, address: &Address) -> ConsoleResult<Zeroizing<String>> {
        let secret = self.retrieve_secret(address, "export").await?;
        info!(target: CONSOLE, "Exported key for {}", self.pretty(address));
        Ok(Zeroizing::new(hex::encode(secret.expose())))
    }

    /// Re-wrap one key under a new password.
    pub async fn reencrypt_key(&self, address: &Address) -> ConsoleResult<()> {
        let hint = self.vault.password_hint(address);
        let old = self
            .ask_password("Re-encrypt key", &format!("Current password for {}", self.pretty(address)), hint)
            .await?;
        let new = self.ask_new_password("Re-encrypt key", "New password").await?;
        self.vault.reencrypt(address, old.expose(), new.expose(), None)?;
        info!(target: CONSOLE, "Re-encrypted key for {}", self.pretty(address));
        Ok(())
    }

    /// Re-wrap every key under one new password.
    ///
    /// Collects all current passwords first; a cancel at any prompt or a
    /// wrong password for any key changes nothing.
    pub async fn reencrypt_all(&self) -> ConsoleResult<usize> {
        let known = self.vault.list_known();
        if known.is_empty() {
            return Ok(0);
        }
        let message = format!("Re-encrypt all {} keys under a single new password?", known.len());
        if !self.gate.confirm("Re-encrypt all keys", &message).await {
            return Err(AuthError::Cancelled.into());
        }

        let mut changes = Vec::with_capacity(known.len());
        for address in &known {
            let pw = self
                .ask_password(
                    "Re-encrypt all keys",
                    &format!("Current password for {}", self.pretty(address)),
                    self.vault.password_hint(address),
                )
                .await?;
            changes.push((*address, Zeroizing::new(pw.expose().to_string())));
        }
        let new = self.ask_new_password("Re-encrypt all keys", "New password for all keys").await?;

        self.vault.reencrypt_many(&changes, new.expose(), None)?;
        info!(target: CONSOLE, "Re-encrypted {} keys", known.len());
        Ok(known.len())
    }

    /// Sign a transfer with `from`'s key and hand it to the node.
    ///
    /// `to` accepts a name or hex address. Returns the transaction hash.
    pub async fn transfer(&self, from: &Address, to: &str, value: u64) -> ConsoleResult<String> {
        let (to, payload) = self.from_string(to)?;
        if !payload.is_empty() {
            return Err(ConsoleError::InvalidInput("transfers do not carry a payload".to_string()));
        }
        let nonce = self.node.nonce_of(from)?;
        let purpose = format!("sending {} to {}", value, self.pretty(&to));
        let secret = self.retrieve_secret(from, &purpose).await?;
        let keypair = KeyPair::from_secret_bytes(secret.expose()).map_err(ConsoleError::InvalidInput)?;
        drop(secret);

        let tx = TransactionRequest { from: *from, to, value, nonce }.sign(&keypair);
        let hash = self.node.submit_transaction(tx)?;
        info!(target: CONSOLE, "Sent {} from {} to {} ({})", value, self.pretty(from), self.pretty(&to), hash);
        self.request_refresh(RefreshTrigger::PendingChanged);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::harness;
    use super::*;
    use crate::error::NotFoundError;
    use crate::gate::testing::{answer_with, Answer};
    use crate::node::NodeFacade;
    use crate::vault::{KeyVault, VaultError};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_new_account_and_transfer() {
        let mut h = harness(false, BTreeMap::new());
        let _seen = answer_with(h.prompts.take().unwrap(), vec![Answer::Password("pw"), Answer::Password("pw"), Answer::Password("pw")]);

        let (alice, phrase) = h.controller.new_account("alice").await.unwrap();
        assert_eq!(phrase.split_whitespace().count(), 24);
        assert_eq!(h.controller.pretty(&alice), "alice");

        // Nothing to spend, but signing and submission still go through
        let bob = Address::from_bytes([0xb0; 20]);
        let hash = h.controller.transfer(&alice, &bob.to_hex(), 0).await.unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(h.node.mining_status().unwrap().pending, 1);
        assert_eq!(h.node.nonce_of(&alice).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_transfer_submits_nothing() {
        let mut h = harness(true, BTreeMap::new());
        let (alice, _) = h.vault.create("alice", "pw", None).unwrap();
        let seen = answer_with(h.prompts.take().unwrap(), vec![Answer::Cancel]);

        let err = h.controller.transfer(&alice, &alice.to_hex(), 1).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Auth(AuthError::Cancelled)));
        assert_eq!(h.node.mining_status().unwrap().pending, 0);
        assert_eq!(seen.lock().unwrap().as_slice(), ["Unlock account"]);
    }

    #[tokio::test]
    async fn test_kill_account_gated() {
        let mut h = harness(true, BTreeMap::new());
        let (alice, _) = h.vault.create("alice", "pw", None).unwrap();
        let _seen = answer_with(
            h.prompts.take().unwrap(),
            vec![Answer::Yes, Answer::Cancel, Answer::Yes, Answer::Password("pw")],
        );

        // Confirmed, then cancelled at the password prompt
        assert!(h.controller.kill_account(&alice).await.is_err());
        assert!(h.vault.list_known().contains(&alice));

        h.controller.kill_account(&alice).await.unwrap();
        assert!(!h.vault.list_known().contains(&alice));
        assert!(matches!(
            h.controller.kill_account(&alice).await,
            Err(ConsoleError::NotFound(NotFoundError::Address(_)))
        ));
    }

    #[tokio::test]
    async fn test_export_requires_password() {
        let mut h = harness(false, BTreeMap::new());
        let (alice, _) = h.vault.create("alice", "pw", None).unwrap();
        let _seen = answer_with(h.prompts.take().unwrap(), vec![Answer::Password("wrong"), Answer::Password("pw")]);

        let err = h.controller.export_key(&alice).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Auth(AuthError::WrongPassword)));
        let hex_secret = h.controller.export_key(&alice).await.unwrap();
        assert_eq!(hex_secret.len(), 64);
    }

    #[tokio::test]
    async fn test_reencrypt_all_is_all_or_nothing() {
        let mut h = harness(false, BTreeMap::new());
        let (a, _) = h.vault.create("a", "pw-a", None).unwrap();
        let (b, _) = h.vault.create("b", "pw-b", None).unwrap();
        let _seen = answer_with(
            h.prompts.take().unwrap(),
            vec![
                // Wrong password for the second key
                Answer::Password("pw-a"),
                Answer::Password("nope"),
                Answer::Password("fresh"),
                Answer::Password("fresh"),
                // Mistyped repeat of the new password
                Answer::Password("pw-a"),
                Answer::Password("pw-b"),
                Answer::Password("fresh"),
                Answer::Password("fresj"),
                // Cancel halfway through
                Answer::Password("pw-a"),
                Answer::Cancel,
            ],
        );

        assert!(h.controller.reencrypt_all().await.is_err());
        assert!(matches!(h.controller.reencrypt_all().await, Err(ConsoleError::InvalidInput(_))));
        assert!(h.controller.reencrypt_all().await.is_err());

        // Old passwords still work for both keys
        h.vault.unlock(&a, "pw-a").unwrap();
        h.vault.unlock(&b, "pw-b").unwrap();
        assert!(matches!(h.vault.unlock(&a, "fresh"), Err(VaultError::Auth(_))));
        assert!(matches!(h.vault.unlock(&b, "fresj"), Err(VaultError::Auth(_))));
    }

    #[tokio::test]
    async fn test_reencrypt_key() {
        let mut h = harness(false, BTreeMap::new());
        let (a, _) = h.vault.create("a", "old", None).unwrap();
        let _seen = answer_with(h.prompts.take().unwrap(), vec![Answer::Password("old"), Answer::Password("new"), Answer::Password("new")]);

        h.controller.reencrypt_key(&a).await.unwrap();
        assert!(h.vault.unlock(&a, "old").is_err());
        h.vault.unlock(&a, "new").unwrap();
    }

    #[tokio::test]
    async fn test_new_account_rejects_mismatched_repeat() {
        let mut h = harness(false, BTreeMap::new());
        let _seen = answer_with(h.prompts.take().unwrap(), vec![Answer::Password("pw"), Answer::Password("wp")]);

        let err = h.controller.new_account("alice").await.unwrap_err();
        assert!(matches!(err, ConsoleError::InvalidInput(_)));
        assert!(h.vault.list_known().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_rejects_payload() {
        let mut h = harness(false, BTreeMap::new());
        let (alice, _) = h.vault.create("alice", "pw", None).unwrap();
        let seen = answer_with(h.prompts.take().unwrap(), vec![]);

        let to = format!("{}:beef", Address::from_bytes([0xb0; 20]).to_hex());
        let err = h.controller.transfer(&alice, &to, 1).await.unwrap_err();
        assert!(matches!(err, ConsoleError::InvalidInput(_)));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(h.node.mining_status().unwrap().pending, 0);
    }
}
