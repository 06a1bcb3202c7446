use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgGroup, Parser, Subcommand};
use schnorr_fun::frost;
use sha2::Sha256;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tss_sessions::config::NodeConfig;
use tss_sessions::frost::FrostEngine;
use tss_sessions::genesis::{set_genesis_contracts, ContractFiles, GenesisState};
use tss_sessions::rocks::RocksStore;
use tss_sessions::server::{self, Node, SharedNode};

#[derive(Parser, Debug)]
#[command(name = "tss-node")]
#[command(about = "Threshold-signature session node", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Serve the HTTP API and drive session expiry from the local block ticker
    Run {
        /// Node configuration file (JSON)
        #[arg(short, long, default_value = "node.json")]
        config: PathBuf,
    },

    /// Write contract bytecode into the tss section of a genesis file
    #[command(group(
        ArgGroup::new("contracts")
            .required(true)
            .multiple(true)
            .args(["gateway", "token", "burnable"])
    ))]
    SetGenesisContracts {
        /// Genesis file, updated in place
        genesis: PathBuf,

        /// Gateway contract artifact
        #[arg(long)]
        gateway: Option<PathBuf>,

        /// Token contract artifact
        #[arg(long)]
        token: Option<PathBuf>,

        /// Burnable contract artifact
        #[arg(long)]
        burnable: Option<PathBuf>,
    },
}

#[rocket::main]
async fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run { config } => run(&config).await,
        Command::SetGenesisContracts {
            genesis,
            gateway,
            token,
            burnable,
        } => {
            tracing_subscriber::fmt().with_target(false).init();
            let files = ContractFiles {
                gateway,
                token,
                burnable,
            };
            seed_contracts(&genesis, &files)
        }
    };
    std::process::exit(code);
}

fn seed_contracts(genesis: &Path, files: &ContractFiles) -> i32 {
    match set_genesis_contracts(genesis, files) {
        Ok(_) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}

async fn run(config_path: &Path) -> i32 {
    let config = match NodeConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let genesis = match GenesisState::from_file(&config.genesis_path) {
        Ok(genesis) => genesis,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };
    let kv = match RocksStore::open(&config.data_dir) {
        Ok(kv) => kv,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };
    let engine = FrostEngine::with_keys(
        frost::new_with_deterministic_nonces::<Sha256>(),
        genesis.frost_keys.clone(),
    );
    let node = match Node::from_genesis(genesis, Box::new(kv), Box::new(engine)) {
        Ok(node) => server::shared(node),
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    let ticker_node = SharedNode::clone(&node);
    let interval_ms = config.block_interval_ms;
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            tick(&ticker_node);
        }
    });

    info!(
        genesis = %config.genesis_path.display(),
        data = %config.data_dir.display(),
        "starting tss node"
    );
    let result = server::build(node).launch().await;
    ticker.abort();
    match result {
        Ok(_) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}

/// Advances the local block height by one and applies the expiry tick.
fn tick(node: &SharedNode) {
    let mut node = match node.write() {
        Ok(node) => node,
        Err(_) => {
            error!("node state lock poisoned");
            return;
        }
    };
    let height = node.height().saturating_add(1);
    match node.advance_to(height) {
        Ok(expired) if !expired.is_empty() => info!(height, ?expired, "expired sessions"),
        Ok(_) => {}
        Err(e) => warn!(height, error = %e, "expiry tick failed"),
    }
}
