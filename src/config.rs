//! Configuration management for LoanLedger nodes

use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub notary: NotarySection,
    #[serde(default)]
    pub flows: FlowConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    pub legal_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotarySection {
    #[serde(default = "default_notary_name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_signing_timeout")]
    pub signing_timeout_secs: u64,
    #[serde(default = "default_broadcast_retries")]
    pub broadcast_retries: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            signing_timeout_secs: default_signing_timeout(),
            broadcast_retries: default_broadcast_retries(),
        }
    }
}

impl FlowConfig {
    pub fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.signing_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file for flow checkpoints. Unset keeps them in memory.
    #[serde(default)]
    pub checkpoint_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Defaults for a node called `legal_name` using notary `notary_name`.
    pub fn new(legal_name: &str, notary_name: &str) -> Self {
        NodeConfig {
            node: NodeSection {
                legal_name: legal_name.to_string(),
            },
            notary: NotarySection {
                name: notary_name.to_string(),
            },
            flows: FlowConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(text)
            .map_err(|e| LedgerError::ConfigError(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.legal_name.trim().is_empty() {
            return Err(LedgerError::ConfigError(
                "node.legal_name must be set".to_string(),
            ));
        }
        if self.notary.name.trim().is_empty() {
            return Err(LedgerError::ConfigError("notary.name must be set".to_string()));
        }
        if self.flows.signing_timeout_secs == 0 {
            return Err(LedgerError::ConfigError(
                "flows.signing_timeout_secs must be positive".to_string(),
            ));
        }
        if matches!(&self.database.checkpoint_path, Some(p) if p.is_empty()) {
            return Err(LedgerError::ConfigError(
                "database.checkpoint_path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a node config from `path`, or fall back to a default node when the
/// file is absent.
pub fn load_config(path: &Path) -> Result<NodeConfig> {
    if !path.exists() {
        let config = NodeConfig::new(&default_legal_name(), &default_notary_name());
        config.validate()?;
        return Ok(config);
    }
    let text = fs::read_to_string(path)?;
    NodeConfig::from_toml(&text)
}

fn default_legal_name() -> String {
    "Bank A".to_string()
}

fn default_notary_name() -> String {
    "Notary".to_string()
}

fn default_signing_timeout() -> u64 {
    30
}

fn default_broadcast_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}
