//! Transaction manager configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use xapool_core::{Error, Result};

/// Options for a [`TransactionManager`](crate::TransactionManager)
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use xapool_coordinator::TransactionConfig;
///
/// let config = TransactionConfig::new()
///     .server_id(7)
///     .default_timeout(Duration::from_secs(30));
///
/// assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Identity of this server inside transaction ids
    pub server_id: u64,
    /// Default transaction timeout in seconds, 0 for none
    pub default_timeout_secs: u64,
    /// Location of the commit-decision log, if one is kept on disk
    pub log_path: Option<PathBuf>,
}

impl TransactionConfig {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server id
    pub fn server_id(mut self, server_id: u64) -> Self {
        self.server_id = server_id;
        self
    }

    /// Set the default timeout; zero disables it
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = timeout.as_secs();
        self
    }

    /// Keep the commit-decision log at `path`
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Default timeout, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.default_timeout_secs > 0).then(|| Duration::from_secs(self.default_timeout_secs))
    }

    /// Check the options for consistency
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::Config(format!(
                "default_timeout_secs {} exceeds the maximum of {}",
                self.default_timeout_secs, MAX_TIMEOUT_SECS
            )));
        }
        if matches!(&self.log_path, Some(p) if p.as_os_str().is_empty()) {
            return Err(Error::Config("log_path must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Longest transaction timeout accepted (one day)
pub const MAX_TIMEOUT_SECS: u64 = 24 * 3600;

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            server_id: 1,
            default_timeout_secs: 0,
            log_path: None,
        }
    }
}
