//! Environment configuration
//!
//! One TOML document describes the transaction manager and every pool:
//!
//! ```toml
//! [transaction]
//! server_id = 3
//! default_timeout_secs = 60
//! log_path = "/var/lib/app/xa.log"
//!
//! [[pools]]
//! name = "orders"
//! max_connections = 16
//!
//! [[pools]]
//! name = "inventory"
//! local_transaction_optimization = false
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use xapool_coordinator::TransactionConfig;
use xapool_core::{Error, Result};
use xapool_pool::PoolConfig;

/// Transaction manager and pool options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XapoolConfig {
    /// Transaction manager options
    pub transaction: TransactionConfig,
    /// One entry per pool
    pub pools: Vec<PoolConfig>,
}

impl XapoolConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: XapoolConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Options of the pool called `name`
    pub fn pool(&self, name: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.name == name)
    }

    /// Add a pool, replacing one of the same name
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pools.retain(|p| p.name != pool.name);
        self.pools.push(pool);
        self
    }

    /// Check every section; pool names must be unique
    pub fn validate(&self) -> Result<()> {
        self.transaction.validate()?;
        let mut names = HashSet::new();
        for pool in &self.pools {
            pool.validate()?;
            if !names.insert(pool.name.as_str()) {
                return Err(Error::Config(format!("duplicate pool name '{}'", pool.name)));
            }
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}
