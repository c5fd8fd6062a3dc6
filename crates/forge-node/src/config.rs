use anyhow::{bail, Result};
use forge_escrow::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub chain: ChainConfig,
    pub monitor: MonitorSettings,
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSettings {
    pub name: String,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub contract_address: Option<String>,
    /// Refuse to run against any other network when set
    pub chain_id: Option<u64>,
    /// Wallet account expected to be unlocked at the provider
    pub account: Option<String>,
    /// Run against an in-process simulated chain
    pub simulate: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
    pub resume_max_attempts: u32,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to `<data_dir>/escrow.snapshot`
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`
    pub format: String,
    pub file_output: Option<PathBuf>,
    #[serde(default)]
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_output: None,
            module_filters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let monitor = MonitorConfig::default();
        Self {
            node: NodeSettings {
                name: "forge-node".to_string(),
                data_dir: PathBuf::from("./data"),
            },
            chain: ChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                contract_address: None,
                chain_id: None,
                account: None,
                simulate: false,
                request_timeout_secs: 30,
            },
            monitor: MonitorSettings {
                poll_interval_secs: monitor.poll_interval.as_secs(),
                max_attempts: monitor.max_attempts,
                resume_max_attempts: monitor.resume_max_attempts,
                batch_size: monitor.batch_size,
            },
            storage: StorageConfig {
                snapshot_path: None,
                snapshot_interval_secs: 300,
            },
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        // Env overrides are applied by the caller so it controls precedence
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = env::var("FORGE_DATA_DIR") {
            if !data_dir.is_empty() {
                self.node.data_dir = PathBuf::from(data_dir);
            }
        }

        // Chain
        if let Ok(url) = env::var("FORGE_RPC_URL") {
            if !url.is_empty() {
                self.chain.rpc_url = url;
            }
        }
        if let Ok(address) = env::var("FORGE_CONTRACT_ADDRESS") {
            if !address.is_empty() {
                self.chain.contract_address = Some(address);
            }
        }
        if let Ok(chain_id) = env::var("FORGE_CHAIN_ID") {
            if let Ok(id) = chain_id.parse() {
                self.chain.chain_id = Some(id);
            }
        }
        if let Ok(account) = env::var("FORGE_ACCOUNT") {
            if !account.is_empty() {
                self.chain.account = Some(account);
            }
        }

        // Monitor
        if let Ok(interval) = env::var("FORGE_POLL_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse() {
                self.monitor.poll_interval_secs = secs;
            }
        }

        if let Ok(level) = env::var("FORGE_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval_secs == 0 {
            bail!("monitor.poll_interval_secs must be positive");
        }
        if self.monitor.max_attempts == 0 || self.monitor.resume_max_attempts == 0 {
            bail!("monitor attempt budgets must be positive");
        }
        if self.storage.snapshot_interval_secs == 0 {
            bail!("storage.snapshot_interval_secs must be positive");
        }
        if !self.chain.simulate && self.chain.contract_address.is_none() {
            bail!("chain.contract_address is required unless chain.simulate is set");
        }
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.monitor.poll_interval_secs),
            max_attempts: self.monitor.max_attempts,
            resume_max_attempts: self.monitor.resume_max_attempts,
            batch_size: self.monitor.batch_size,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.storage
            .snapshot_path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("escrow.snapshot"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_monitor_budgets() {
        let config = NodeConfig::default();
        let monitor = config.monitor_config();
        assert_eq!(monitor.poll_interval, Duration::from_secs(15));
        assert_eq!(monitor.max_attempts, 60);
        assert_eq!(monitor.resume_max_attempts, 40);
        assert_eq!(config.snapshot_path(), PathBuf::from("./data/escrow.snapshot"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("forge.toml");

        let mut config = NodeConfig::default();
        config.chain.simulate = true;
        config
            .logging
            .module_filters
            .insert("forge_chain".to_string(), "debug".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate() {
        let mut config = NodeConfig::default();
        assert!(config.validate().is_err());

        config.chain.contract_address = Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".into());
        assert!(config.validate().is_ok());

        config.monitor.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("FORGE_DATA_DIR", "/test/forge");
        env::set_var("FORGE_RPC_URL", "http://10.0.0.5:8545");
        env::set_var("FORGE_CONTRACT_ADDRESS", "0x5FbDB2315678afecb367f032d93F642f64180aa3");
        env::set_var("FORGE_CHAIN_ID", "11155111");
        env::set_var("FORGE_POLL_INTERVAL_SECS", "5");
        env::set_var("FORGE_LOG_LEVEL", "debug");

        let mut config = NodeConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.node.data_dir, PathBuf::from("/test/forge"));
        assert_eq!(config.chain.rpc_url, "http://10.0.0.5:8545");
        assert_eq!(
            config.chain.contract_address.as_deref(),
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );
        assert_eq!(config.chain.chain_id, Some(11155111));
        assert_eq!(config.monitor.poll_interval_secs, 5);
        assert_eq!(config.logging.level, "debug");

        env::remove_var("FORGE_DATA_DIR");
        env::remove_var("FORGE_RPC_URL");
        env::remove_var("FORGE_CONTRACT_ADDRESS");
        env::remove_var("FORGE_CHAIN_ID");
        env::remove_var("FORGE_POLL_INTERVAL_SECS");
        env::remove_var("FORGE_LOG_LEVEL");
    }
}
