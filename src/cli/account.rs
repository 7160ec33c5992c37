//! Offline key management straight against the vault file.

use clap::Subcommand;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, ConsoleResult};
use crate::vault::{recovery, EncryptedKeyVault, KeyVault};

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a key; prints its recovery phrase once
    New {
        #[arg(long)]
        label: String,
        #[arg(long)]
        hint: Option<String>,
    },
    /// List stored keys
    List,
    /// Import from a recovery phrase or a hex secret (read from stdin)
    Import {
        #[arg(long)]
        label: String,
        #[arg(long)]
        hint: Option<String>,
    },
}

fn read_line(prompt: &str) -> ConsoleResult<Zeroizing<String>> {
    print!("{}", prompt);
    io::stdout().flush().map_err(|e| ConsoleError::InvalidInput(e.to_string()))?;
    let mut line = Zeroizing::new(String::new());
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| ConsoleError::InvalidInput(e.to_string()))?;
    Ok(Zeroizing::new(line.trim().to_string()))
}

fn read_new_password() -> ConsoleResult<Zeroizing<String>> {
    let first = read_line("Password: ")?;
    let again = read_line("Repeat password: ")?;
    if first.is_empty() || *first != *again {
        return Err(ConsoleError::InvalidInput("passwords empty or do not match".to_string()));
    }
    Ok(first)
}

/// Recovery phrase (words) or 32-byte hex secret.
pub fn parse_secret(input: &str) -> ConsoleResult<Zeroizing<Vec<u8>>> {
    let input = input.trim();
    if input.contains(char::is_whitespace) {
        return Ok(recovery::secret_from_phrase(input)?);
    }
    hex::decode(input.trim_start_matches("0x"))
        .map(Zeroizing::new)
        .map_err(|e| ConsoleError::InvalidInput(format!("not a phrase or hex secret: {}", e)))
}

pub fn handle_account_command(cmd: AccountCommands, config: &ConsoleConfig) -> ConsoleResult<()> {
    let ttl = Duration::from_secs(config.accounts.unlock_ttl_secs);
    let vault = EncryptedKeyVault::open(Path::new(&config.accounts.vault_path), ttl)?;

    match cmd {
        AccountCommands::New { label, hint } => {
            let password = read_new_password()?;
            let (address, phrase) = vault.create(&label, &password, hint.as_deref())?;
            let phrase = Zeroizing::new(phrase);
            println!("Account '{}' created: {}", label, address);
            println!("Recovery phrase: {}", phrase.as_str());
            println!("KEEP THIS SAFE!");
        }
        AccountCommands::List => {
            let known = vault.list_known();
            if known.is_empty() {
                println!("No keys in {}", config.accounts.vault_path);
            }
            for address in known {
                println!("{}  {}", address, vault.label(&address).unwrap_or_default());
            }
        }
        AccountCommands::Import { label, hint } => {
            let input = read_line("Recovery phrase or hex secret: ")?;
            let secret = parse_secret(&input)?;
            let password = read_new_password()?;
            let address = vault.import(&label, &secret, &password, hint.as_deref())?;
            println!("Imported '{}' as {}", label, address);
        }
    }
    Ok(())
}
