//! Node configuration.
//!
//! Loaded from a TOML file, then overridden by command-line flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vex_consensus::DEFAULT_ACTIVITY_WINDOW_MS;
use vex_core::{GenesisConfig, LedgerConfig, DEFAULT_BASE_REWARD, DEFAULT_GENESIS_STAKE, DEFAULT_MAX_BLOCK_TRANSACTIONS};
use vex_txpool::PoolConfig;
use vex_types::{Amount, VEX};

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name
    pub name: String,
    /// Data directory
    pub data_dir: PathBuf,
    /// Consensus configuration
    pub consensus: ConsensusConfig,
    /// Mempool configuration
    pub mempool: MempoolConfig,
    /// Worker supervision
    pub supervisor: SupervisorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "vex-node".to_string(),
            data_dir: PathBuf::from("./data"),
            consensus: ConsensusConfig::default(),
            mempool: MempoolConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if path.to_string_lossy().contains("..") {
            anyhow::bail!("Invalid path: directory traversal detected");
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: NodeConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        if path.to_string_lossy().contains("..") {
            anyhow::bail!("Invalid path: directory traversal detected");
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| anyhow::anyhow!("Failed to write config file '{}': {}", path.display(), e))?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.consensus.block_interval_ms == 0 {
            anyhow::bail!("Block interval cannot be 0");
        }
        if self.consensus.max_block_transactions == 0 {
            anyhow::bail!("Blocks must be allowed at least one transaction");
        }
        if self.consensus.genesis_stake == 0 {
            anyhow::bail!("Genesis stake must be positive");
        }
        if self.consensus.activity_window_secs == 0 {
            anyhow::bail!("Activity window cannot be 0");
        }
        if self.mempool.max_size == 0 {
            anyhow::bail!("Mempool size cannot be 0");
        }
        if self.mempool.sweep_interval_secs == 0 || self.supervisor.health_interval_secs == 0 {
            anyhow::bail!("Worker intervals cannot be 0");
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format '{}' (expected json or pretty)", self.logging.format);
        }
        Ok(())
    }

    /// Ledger parameters derived from this configuration.
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            base_reward: whole_vex(self.consensus.base_reward),
            max_block_transactions: self.consensus.max_block_transactions,
            activity_window_ms: self.consensus.activity_window_secs.saturating_mul(1000),
            genesis: GenesisConfig {
                alloc: Vec::new(),
                stake: whole_vex(self.consensus.genesis_stake),
            },
        }
    }

    /// Pool parameters derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.mempool.max_size,
            ttl: Duration::from_secs(self.mempool.ttl_secs),
        }
    }

    /// Where the validator seed lives when no explicit path is set.
    pub fn validator_key_path(&self) -> PathBuf {
        self.consensus
            .validator_key
            .clone()
            .unwrap_or_else(|| self.data_dir.join("validator.key"))
    }
}

fn whole_vex(amount: u64) -> Amount {
    Amount::from(amount).saturating_mul(VEX)
}

/// Consensus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Produce blocks locally
    pub validator: bool,
    /// Validator seed file
    pub validator_key: Option<PathBuf>,
    /// Sign a fresh genesis with the validator key instead of a throwaway key
    pub dev_bootstrap: bool,
    /// Delay between production attempts
    pub block_interval_ms: u64,
    /// Base block reward in whole VEX
    pub base_reward: u64,
    /// Stake minted to the genesis validator in whole VEX
    pub genesis_stake: u64,
    /// Transactions pulled per block
    pub max_block_transactions: usize,
    /// Validators idle longer than this are not selected
    pub activity_window_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            validator: false,
            validator_key: None,
            dev_bootstrap: true,
            block_interval_ms: 5_000,
            base_reward: (DEFAULT_BASE_REWARD / VEX) as u64,
            genesis_stake: (DEFAULT_GENESIS_STAKE / VEX) as u64,
            max_block_transactions: DEFAULT_MAX_BLOCK_TRANSACTIONS,
            activity_window_secs: DEFAULT_ACTIVITY_WINDOW_MS / 1000,
        }
    }
}

/// Mempool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum pending transactions
    pub max_size: usize,
    /// Pending transactions older than this are dropped
    pub ttl_secs: u64,
    /// How often expired entries are swept
    pub sweep_interval_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            max_size: pool.max_size,
            ttl_secs: pool.ttl.as_secs(),
            sweep_interval_secs: 60,
        }
    }
}

/// Worker supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long startup waits for every worker to report ready
    pub readiness_timeout_secs: u64,
    /// Health monitor period
    pub health_interval_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_secs: 10,
            health_interval_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log to file
    pub log_file: Option<PathBuf>,
    /// Log format (json|pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.name, "vex-node");
        assert!(!config.consensus.validator);
        assert_eq!(config.mempool.max_size, 1000);
        assert_eq!(config.mempool.ttl_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = NodeConfig::default();
        config.consensus.block_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.mempool.max_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("node.toml");

        let mut config = NodeConfig::default();
        config.name = "alpha".to_string();
        config.consensus.validator = true;
        config.consensus.genesis_stake = 5_000;
        config.to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.name, "alpha");
        assert!(loaded.consensus.validator);
        assert_eq!(loaded.consensus.genesis_stake, 5_000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("node.toml");
        std::fs::write(&path, "name = \"beta\"\n[mempool]\nmax_size = 10\n").unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.name, "beta");
        assert_eq!(loaded.mempool.max_size, 10);
        assert_eq!(loaded.mempool.ttl_secs, 3600);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_traversal_rejected() {
        assert!(NodeConfig::from_file(Path::new("../node.toml")).is_err());
    }

    #[test]
    fn test_derived_configs() {
        let mut config = NodeConfig::default();
        config.consensus.activity_window_secs = 60;
        config.mempool.ttl_secs = 5;

        assert_eq!(config.ledger_config().activity_window_ms, 60_000);
        assert_eq!(config.ledger_config().base_reward, DEFAULT_BASE_REWARD);
        assert_eq!(config.ledger_config().genesis.stake, DEFAULT_GENESIS_STAKE);
        assert_eq!(config.pool_config().ttl, Duration::from_secs(5));
        assert_eq!(config.validator_key_path(), PathBuf::from("./data/validator.key"));
    }
}
