//! Confirmation gate
//!
//! Every path to secret material goes through here. Prompts are posted as
//! requests on a channel owned by the front end and answered through a
//! oneshot, so a background task awaiting an answer never blocks a thread
//! and never touches the UI directly.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::address::Address;
use crate::error::{AuthError, ConsoleError, ConsoleResult};
use crate::vault::{KeyVault, Secret, VaultError};

const PROMPT_QUEUE: usize = 16;

/// A password typed by the operator. Zeroed on drop.
pub struct Password(Zeroizing<String>);

impl Password {
    pub fn new(s: impl Into<String>) -> Self {
        Password(Zeroizing::new(s.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// A question for the operator, answered through `respond`.
#[derive(Debug)]
pub enum PromptRequest {
    Confirm {
        title: String,
        message: String,
        respond: oneshot::Sender<bool>,
    },
    Password {
        title: String,
        message: String,
        hint: Option<String>,
        respond: oneshot::Sender<Option<Password>>,
    },
}

impl PromptRequest {
    pub fn title(&self) -> &str {
        match self {
            PromptRequest::Confirm { title, .. } | PromptRequest::Password { title, .. } => title,
        }
    }
}

pub type PromptReceiver = mpsc::Receiver<PromptRequest>;

#[derive(Debug)]
pub enum Authenticated {
    Password(Password),
    /// Key was already unlocked and re-prompting is switched off
    AlreadyUnlocked,
}

/// Process-wide prompt preferences, shared with the controller's settings.
#[derive(Debug, Default)]
pub struct GatePolicy {
    require_confirmation: AtomicBool,
    skip_reprompt: AtomicBool,
}

impl GatePolicy {
    pub fn new(require_confirmation: bool, skip_reprompt: bool) -> Self {
        Self {
            require_confirmation: AtomicBool::new(require_confirmation),
            skip_reprompt: AtomicBool::new(skip_reprompt),
        }
    }

    pub fn require_confirmation(&self) -> bool {
        self.require_confirmation.load(Ordering::SeqCst)
    }

    pub fn set_require_confirmation(&self, on: bool) {
        self.require_confirmation.store(on, Ordering::SeqCst);
    }

    pub fn skip_reprompt(&self) -> bool {
        self.skip_reprompt.load(Ordering::SeqCst)
    }

    pub fn set_skip_reprompt(&self, on: bool) {
        self.skip_reprompt.store(on, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct ConfirmationGate {
    prompts: mpsc::Sender<PromptRequest>,
    policy: Arc<GatePolicy>,
    vault: Arc<dyn KeyVault>,
}

impl ConfirmationGate {
    pub fn new(vault: Arc<dyn KeyVault>, policy: Arc<GatePolicy>) -> (Self, PromptReceiver) {
        let (prompts, rx) = mpsc::channel(PROMPT_QUEUE);
        (Self { prompts, policy, vault }, rx)
    }

    pub fn policy(&self) -> &Arc<GatePolicy> {
        &self.policy
    }

    /// Yes/no question. Answers `true` without asking when confirmation is off.
    /// A front end that has gone away counts as "no".
    pub async fn confirm(&self, title: &str, message: &str) -> bool {
        if !self.policy.require_confirmation() {
            return true;
        }
        let (respond, answer) = oneshot::channel();
        let req = PromptRequest::Confirm {
            title: title.to_string(),
            message: message.to_string(),
            respond,
        };
        if self.prompts.send(req).await.is_err() {
            debug!("Gate: no prompt handler for '{}'", title);
            return false;
        }
        answer.await.unwrap_or(false)
    }

    /// Ask for a password. Always prompts; `None` means cancelled.
    pub async fn authenticate(&self, title: &str, message: &str, hint: Option<String>) -> Option<Password> {
        let (respond, answer) = oneshot::channel();
        let req = PromptRequest::Password {
            title: title.to_string(),
            message: message.to_string(),
            hint,
            respond,
        };
        if self.prompts.send(req).await.is_err() {
            debug!("Gate: no prompt handler for '{}'", title);
            return None;
        }
        answer.await.ok().flatten()
    }

    /// Authenticate on behalf of one key.
    ///
    /// Skips the prompt when the key is unlocked and re-prompting is off.
    /// Cancelling revokes any standing unlock of that key, so a cancelled
    /// prompt is never followed by a secret from an older unlock.
    pub async fn authenticate_for(&self, address: &Address, title: &str, message: &str) -> Result<Authenticated, AuthError> {
        if self.policy.skip_reprompt() && self.vault.is_unlocked(address) {
            return Ok(Authenticated::AlreadyUnlocked);
        }
        match self.authenticate(title, message, self.vault.password_hint(address)).await {
            Some(pw) => Ok(Authenticated::Password(pw)),
            None => {
                self.vault.lock(address);
                info!("Gate: authentication for {} cancelled", address);
                Err(AuthError::Cancelled)
            }
        }
    }

    /// Authenticate and unlock `address` in the vault.
    pub async fn unlock(&self, address: &Address, title: &str, message: &str) -> ConsoleResult<()> {
        match self.authenticate_for(address, title, message).await? {
            Authenticated::AlreadyUnlocked => Ok(()),
            Authenticated::Password(pw) => {
                self.vault.unlock(address, pw.expose())?;
                Ok(())
            }
        }
    }

    /// The only way the console reaches a secret.
    ///
    /// Unlocked key: confirm (unless confirmation is off) and return it.
    /// Locked key: prompt for the password, unlock, return it.
    pub async fn retrieve_secret(&self, address: &Address, purpose: &str) -> ConsoleResult<Secret> {
        match self.vault.retrieve(address) {
            Ok(secret) => {
                let message = format!("Allow {} to use the key for {}?", purpose, address);
                if self.confirm("Use key", &message).await {
                    Ok(secret)
                } else {
                    Err(AuthError::Cancelled.into())
                }
            }
            Err(VaultError::Locked(_)) => {
                let message = format!("Enter the password for {} ({})", address, purpose);
                let password = match self.authenticate_for(address, "Unlock account", &message).await? {
                    Authenticated::Password(pw) => pw,
                    // Unlock lapsed between the two checks; ask properly.
                    Authenticated::AlreadyUnlocked => self
                        .authenticate("Unlock account", &message, self.vault.password_hint(address))
                        .await
                        .ok_or(AuthError::Cancelled)?,
                };
                self.vault.unlock(address, password.expose())?;
                Ok(self.vault.retrieve(address)?)
            }
            Err(e) => Err(ConsoleError::from(e)),
        }
    }
}

/// Canned operator answers for tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum Answer {
        Yes,
        No,
        Password(&'static str),
        Cancel,
    }

    /// Answers prompts in order; records each prompt title.
    pub fn answer_with(mut rx: PromptReceiver, answers: Vec<Answer>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            let mut answers: VecDeque<Answer> = answers.into();
            while let Some(req) = rx.recv().await {
                log.lock().unwrap().push(req.title().to_string());
                let answer = answers.pop_front().unwrap_or(Answer::Cancel);
                match req {
                    PromptRequest::Confirm { respond, .. } => {
                        let _ = respond.send(matches!(answer, Answer::Yes));
                    }
                    PromptRequest::Password { respond, .. } => {
                        let pw = match answer {
                            Answer::Password(p) => Some(Password::new(p)),
                            _ => None,
                        };
                        let _ = respond.send(pw);
                    }
                }
            }
        });
        seen
    }
}
