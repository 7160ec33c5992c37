use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use helmsman::cli::{account, terminal, Cli, Commands, ConfigCommands};
use helmsman::config::ConsoleConfig;
use helmsman::controller::Controller;
use helmsman::error::ConsoleResult;
use helmsman::node::EmbeddedNode;
use helmsman::rpc::RpcServer;
use helmsman::vault::{EncryptedKeyVault, KeyVault};

/// Starting balance for every local key on a fresh embedded chain
const DEV_ALLOCATION: u64 = 1_000_000;
const BLOCK_INTERVAL: Duration = Duration::from_secs(2);

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = if cli.config.exists() {
        match ConsoleConfig::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load {}: {}", cli.config.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        ConsoleConfig::default()
    };
    init_tracing(&config.log_level);

    let result = match cli.command {
        Some(Commands::Account { cmd }) => account::handle_account_command(cmd, &config),
        Some(Commands::Config { cmd: ConfigCommands::Show }) => show_config(&config),
        Some(Commands::Run { no_rpc }) => run_console(&cli.config, no_rpc).await,
        None => run_console(&cli.config, false).await,
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn show_config(config: &ConsoleConfig) -> ConsoleResult<()> {
    let text = toml::to_string_pretty(config).map_err(helmsman::config::ConfigError::from)?;
    println!("{}", text);
    Ok(())
}

async fn run_console(config_path: &Path, no_rpc: bool) -> ConsoleResult<()> {
    let config = ConsoleConfig::load_or_default(config_path);
    let ttl = Duration::from_secs(config.accounts.unlock_ttl_secs);
    let vault = Arc::new(EncryptedKeyVault::open(Path::new(&config.accounts.vault_path), ttl)?);

    let genesis: BTreeMap<_, _> = vault.list_known().into_iter().map(|a| (a, DEV_ALLOCATION)).collect();
    info!("Embedded node: {} funded accounts at genesis", genesis.len());
    let node = Arc::new(EmbeddedNode::new(genesis));

    let rpc = config.rpc.enabled && !no_rpc;
    let rpc_port = config.rpc.port;
    let (controller, prompts) =
        Controller::new(config, Some(PathBuf::from(config_path)), node.clone(), vault.clone())?;
    let token = controller.shutdown_token().clone();

    let miner = node.spawn_miner(BLOCK_INTERVAL, token.subscribe());
    if rpc {
        let server = RpcServer::new(node.clone(), rpc_port);
        let stop = token.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server.start(stop).await {
                error!("RPC server failed: {}", e);
            }
        });
    }

    let on_signal = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            on_signal.shutdown();
        }
    });

    let front_end = tokio::spawn(terminal::run(controller.clone(), prompts));
    controller.run().await?;

    let _ = front_end.await;
    let _ = miner.await;
    vault.lock_all();
    Ok(())
}
