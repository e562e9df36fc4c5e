//! VEX Node - single-node Proof-of-Stake ledger daemon.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vex_core::{KeyProvider, Ledger};
use vex_storage::{Database, StateStore};
use vex_txpool::TransactionPool;

mod config;
mod keys;
mod network;
mod supervisor;
mod telemetry;

use config::NodeConfig;
use keys::FileKeyProvider;
use network::LoggingNetwork;
use supervisor::{Supervisor, SupervisorSettings};

/// VEX Node
#[derive(Parser, Debug)]
#[command(name = "vex-node")]
#[command(about = "Single-node Proof-of-Stake ledger")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "VEX_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, env = "VEX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Produce blocks with the local validator key
    #[arg(long, env = "VEX_VALIDATOR")]
    validator: bool,

    /// Validator key file
    #[arg(long, env = "VEX_VALIDATOR_KEY")]
    validator_key: Option<PathBuf>,

    /// Log level or filter directive
    #[arg(short, long, env = "VEX_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "VEX_LOG_JSON")]
    json_logs: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

impl Args {
    /// Apply command-line overrides on top of `config`.
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if self.validator {
            config.consensus.validator = true;
        }
        if let Some(key) = &self.validator_key {
            config.consensus.validator_key = Some(key.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.format = "json".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    if let Some(path) = &args.dump_config {
        config.to_file(path)?;
        return Ok(());
    }

    let json = config.logging.format == "json";
    match &config.logging.log_file {
        Some(file) => telemetry::init_telemetry_with_file(&config.logging.level, json, file)?,
        None => telemetry::init_telemetry(&config.logging.level, json)?,
    }

    info!("Starting VEX node v{}", env!("CARGO_PKG_VERSION"));
    info!("Node name: {}", config.name);
    info!("Data directory: {:?}", config.data_dir);

    std::fs::create_dir_all(&config.data_dir)?;

    let keys = if config.consensus.validator || config.consensus.dev_bootstrap {
        Some(Arc::new(FileKeyProvider::load_or_generate(&config.validator_key_path())?))
    } else {
        None
    };
    if let Some(keys) = &keys {
        info!(
            address = %KeyProvider::address(keys.as_ref()),
            path = %keys.path().display(),
            "Validator key loaded"
        );
    }

    let db = Arc::new(Database::open(&config.data_dir)?);
    let state = Arc::new(StateStore::open(db)?);
    let pool = Arc::new(TransactionPool::load(config.pool_config(), state.clone())?);
    let genesis_key = if config.consensus.dev_bootstrap {
        keys.as_ref().map(|k| k.keypair())
    } else {
        None
    };
    let network = Arc::new(LoggingNetwork::new());
    let ledger = Arc::new(Ledger::open(
        config.ledger_config(),
        state,
        pool,
        network.clone(),
        genesis_key,
    )?);
    info!(
        height = ledger.len().saturating_sub(1),
        phase = ?ledger.phase(),
        pending = ledger.pool().len(),
        "Ledger open"
    );

    if let Err(e) = ledger.sync() {
        warn!(error = %e, "Initial sync failed");
    }

    let producer: Option<Arc<dyn KeyProvider>> = if config.consensus.validator {
        keys.map(|k| k as Arc<dyn KeyProvider>)
    } else {
        None
    };
    let mut supervisor = Supervisor::new(ledger.clone(), producer, SupervisorSettings::from_config(&config));
    supervisor.start();
    supervisor.wait_until_ready().await?;
    info!("Node is running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received");

    supervisor.shutdown().await;
    info!(
        height = ledger.len().saturating_sub(1),
        blocks_broadcast = network.blocks_broadcast(),
        transactions_broadcast = network.transactions_broadcast(),
        sync_requests = network.sync_requests(),
        "Node stopped"
    );
    if let Some((index, hash)) = network.recent_blocks().last() {
        debug!(index, hash = %hash, recent_transactions = network.recent_transactions().len(), "Last block broadcast");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args() {
        let args = Args::parse_from([
            "vex-node",
            "--data-dir",
            "/tmp/vex",
            "--validator",
            "--log-level",
            "debug",
            "--json-logs",
        ]);

        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/vex")));
        assert!(args.validator);
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from(["vex-node", "--validator", "--json-logs", "-d", "/srv/vex"]);
        let mut config = NodeConfig::default();
        args.apply(&mut config);

        assert!(config.consensus.validator);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.data_dir, PathBuf::from("/srv/vex"));
        assert!(config.validate().is_ok());
    }
}
