//! Console commands typed at the terminal.

use std::sync::Arc;
use tracing::info;

use crate::config::VmBackend;
use crate::controller::{Controller, CONSOLE};
use crate::error::{ConsoleError, ConsoleResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Help,
    Status,
    Accounts,
    NewAccount { label: String },
    Name { target: String, name: String },
    Send { from: String, to: String, value: u64 },
    Export { target: String },
    Kill { target: String },
    Reencrypt { target: String },
    ReencryptAll,
    Net(bool),
    Peer(String),
    IdealPeers(u32),
    Private(Option<String>),
    Mine,
    MiningFlags { force: bool, turbo: bool },
    Beneficiary(String),
    Vm(VmBackend),
    Inject(String),
    Rewind(u64),
    KillChain,
    ClearPending,
    Refresh,
    Confirmations(bool),
    Quit,
}

pub const HELP: &str = "\
status | accounts | new <label> | name <account> <name...> | send <from> <to> <value>
export <account> | kill <account> | reencrypt <account> | reencrypt-all
net on|off | peer <host:port> | ideal-peers <n> | private [id] | beneficiary <account>
mine | mining-flags <force:on|off> <turbo:on|off> | vm interpreter|jit|smart
inject <hex block> | rewind <number> | kill-chain | clear-pending | refresh
confirm on|off | quit";

fn on_off(word: Option<&str>) -> ConsoleResult<bool> {
    match word {
        Some("on") | Some("true") | Some("yes") => Ok(true),
        Some("off") | Some("false") | Some("no") => Ok(false),
        other => Err(ConsoleError::InvalidInput(format!("expected on/off, got {:?}", other.unwrap_or("")))),
    }
}

fn number<T: std::str::FromStr>(word: Option<&str>) -> ConsoleResult<T> {
    word.and_then(|w| w.parse().ok())
        .ok_or_else(|| ConsoleError::InvalidInput(format!("expected a number, got {:?}", word.unwrap_or(""))))
}

fn arg(word: Option<&str>, what: &str) -> ConsoleResult<String> {
    word.map(str::to_string).ok_or_else(|| ConsoleError::InvalidInput(format!("missing {}", what)))
}

impl OperatorCommand {
    pub fn parse(line: &str) -> ConsoleResult<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ConsoleError::InvalidInput("empty command".to_string()));
        };
        let cmd = match verb {
            "help" | "?" => Self::Help,
            "status" => Self::Status,
            "accounts" => Self::Accounts,
            "new" => Self::NewAccount { label: words.collect::<Vec<_>>().join(" ") },
            "name" => {
                let target = arg(words.next(), "account")?;
                Self::Name { target, name: words.collect::<Vec<_>>().join(" ") }
            }
            "send" => Self::Send {
                from: arg(words.next(), "sender")?,
                to: arg(words.next(), "recipient")?,
                value: number(words.next())?,
            },
            "export" => Self::Export { target: arg(words.next(), "account")? },
            "kill" => Self::Kill { target: arg(words.next(), "account")? },
            "reencrypt" => Self::Reencrypt { target: arg(words.next(), "account")? },
            "reencrypt-all" => Self::ReencryptAll,
            "net" | "go" => Self::Net(on_off(words.next().or(Some("on")))?),
            "peer" => Self::Peer(arg(words.next(), "peer address")?),
            "ideal-peers" => Self::IdealPeers(number(words.next())?),
            "private" => Self::Private(words.next().map(str::to_string)),
            "mine" => Self::Mine,
            "mining-flags" => Self::MiningFlags { force: on_off(words.next())?, turbo: on_off(words.next())? },
            "beneficiary" => Self::Beneficiary(arg(words.next(), "account")?),
            "vm" => Self::Vm(match words.next() {
                Some("interpreter") => VmBackend::Interpreter,
                Some("jit") => VmBackend::Jit,
                Some("smart") => VmBackend::Smart,
                other => return Err(ConsoleError::InvalidInput(format!("unknown VM {:?}", other.unwrap_or("")))),
            }),
            "inject" => Self::Inject(arg(words.next(), "block hex")?),
            "rewind" => Self::Rewind(number(words.next())?),
            "kill-chain" => Self::KillChain,
            "clear-pending" => Self::ClearPending,
            "refresh" => Self::Refresh,
            "confirm" => Self::Confirmations(on_off(words.next())?),
            "quit" | "exit" => Self::Quit,
            other => return Err(ConsoleError::InvalidInput(format!("unknown command '{}', try 'help'", other))),
        };
        Ok(cmd)
    }

    /// Run against the controller. Output goes to the operator log.
    pub async fn execute(self, controller: Arc<Controller>) -> ConsoleResult<()> {
        let c = controller.as_ref();
        match self {
            Self::Help => println!("{}", HELP),
            Self::Status => {
                let snap = c.snapshot();
                info!(
                    target: CONSOLE,
                    "#{} blocks, {} peers, mining {} ({} pending), total {}{}",
                    snap.block_count,
                    snap.peer_count,
                    if snap.mining.mining { "on" } else { "off" },
                    snap.mining.pending,
                    snap.total_balance,
                    if c.refresh().node_unreachable() { " [node unreachable]" } else { "" }
                );
            }
            Self::Accounts => {
                let snap = c.snapshot();
                for address in c.vault().list_known() {
                    let balance = snap.balance_of(&address).map(|b| b.to_string()).unwrap_or_else(|| "?".to_string());
                    info!(target: CONSOLE, "{}  {}", c.render(&address), balance);
                }
            }
            Self::NewAccount { label } => {
                let (address, phrase) = c.new_account(&label).await?;
                println!("Account {} created. Recovery phrase:\n{}", address, phrase.as_str());
            }
            Self::Name { target, name } => {
                let (address, _) = c.from_string(&target)?;
                c.set_account_name(address, &name)?;
            }
            Self::Send { from, to, value } => {
                let (from, _) = c.from_string(&from)?;
                c.transfer(&from, &to, value).await?;
            }
            Self::Export { target } => {
                let (address, _) = c.from_string(&target)?;
                let secret = c.export_key(&address).await?;
                println!("{}", secret.as_str());
            }
            Self::Kill { target } => {
                let (address, _) = c.from_string(&target)?;
                c.kill_account(&address).await?;
            }
            Self::Reencrypt { target } => {
                let (address, _) = c.from_string(&target)?;
                c.reencrypt_key(&address).await?;
            }
            Self::ReencryptAll => {
                c.reencrypt_all().await?;
            }
            Self::Net(on) => c.set_networking(on)?,
            Self::Peer(peer) => c.connect_peer(&peer)?,
            Self::IdealPeers(n) => c.set_ideal_peers(n)?,
            Self::Private(id) => c.set_private_chain(id.as_deref())?,
            Self::Mine => {
                let on = c.toggle_mining()?;
                info!(target: CONSOLE, "Mining {}", if on { "on" } else { "off" });
            }
            Self::MiningFlags { force, turbo } => c.set_mining_flags(force, turbo)?,
            Self::Beneficiary(target) => {
                let (address, _) = c.from_string(&target)?;
                c.set_beneficiary(address)?;
            }
            Self::Vm(vm) => c.set_vm_backend(vm)?,
            Self::Inject(block_hex) => {
                let bytes = hex::decode(block_hex.trim_start_matches("0x"))
                    .map_err(|e| ConsoleError::InvalidInput(e.to_string()))?;
                c.inject_block(&bytes)?;
            }
            Self::Rewind(n) => c.rewind_chain(n).await?,
            Self::KillChain => c.kill_blockchain().await?,
            Self::ClearPending => {
                c.clear_pending()?;
            }
            Self::Refresh => {
                c.refresh_now().await;
            }
            Self::Confirmations(on) => c.set_require_confirmation(on)?,
            Self::Quit => c.shutdown(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            OperatorCommand::parse("send alice 0xb0 25").unwrap(),
            OperatorCommand::Send { from: "alice".into(), to: "0xb0".into(), value: 25 }
        );
        assert_eq!(
            OperatorCommand::parse("name 0xaa Rainy Day").unwrap(),
            OperatorCommand::Name { target: "0xaa".into(), name: "Rainy Day".into() }
        );
        assert_eq!(OperatorCommand::parse("go").unwrap(), OperatorCommand::Net(true));
        assert_eq!(OperatorCommand::parse("net off").unwrap(), OperatorCommand::Net(false));
        assert_eq!(OperatorCommand::parse("private").unwrap(), OperatorCommand::Private(None));
        assert_eq!(OperatorCommand::parse("vm jit").unwrap(), OperatorCommand::Vm(VmBackend::Jit));
        assert_eq!(
            OperatorCommand::parse("mining-flags on off").unwrap(),
            OperatorCommand::MiningFlags { force: true, turbo: false }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(OperatorCommand::parse("").is_err());
        assert!(OperatorCommand::parse("send alice bob lots").is_err());
        assert!(OperatorCommand::parse("vm quantum").is_err());
        assert!(OperatorCommand::parse("launch").is_err());
        assert!(OperatorCommand::parse("confirm maybe").is_err());
    }
}
