pub mod account;
pub mod command;
pub mod terminal;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "helmsman")]
#[command(about = "Operator console for an embedded chain node", long_about = None)]
pub struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = "helmsman.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the node and the interactive console
    Run {
        /// Do not start the JSON-RPC server
        #[arg(long)]
        no_rpc: bool,
    },
    /// Key management without starting the node
    Account {
        #[command(subcommand)]
        cmd: account::AccountCommands,
    },
    /// Settings
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["helmsman", "run", "--no-rpc"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run { no_rpc: true })));
        assert_eq!(cli.config, PathBuf::from("helmsman.toml"));

        let cli = Cli::try_parse_from(["helmsman", "--config", "x.toml", "account", "new", "--label", "main"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(
            cli.command,
            Some(Commands::Account { cmd: account::AccountCommands::New { .. } })
        ));

        assert!(Cli::try_parse_from(["helmsman", "config", "show"]).is_ok());
        assert!(Cli::try_parse_from(["helmsman", "bogus"]).is_err());
    }
}
