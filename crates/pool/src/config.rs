//! Connection pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use xapool_core::{Error, Result};

/// Options for a [`ConnectionPool`](crate::ConnectionPool)
///
/// Durations are in milliseconds; `0` disables the corresponding bound.
///
/// # Examples
///
/// ```
/// use xapool_pool::PoolConfig;
///
/// let config = PoolConfig::new("orders")
///     .max_connections(8)
///     .shareable(false);
///
/// assert_eq!(config.max_connections, 8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name, used in logs and errors
    pub name: String,
    /// Physical connections allowed before callers wait
    pub max_connections: usize,
    /// Extra connections created once the wait time expires
    pub max_overflow_connections: usize,
    /// Connections allowed to be opening at the same time
    pub max_create_connections: usize,
    /// Capacity of the idle ring
    pub max_idle_count: usize,
    /// Idle connections older than this are closed
    pub max_idle_time_ms: u64,
    /// Active connections unused for longer than this are closed
    pub max_active_time_ms: u64,
    /// Connections older than this are closed once idle
    pub max_pool_time_ms: u64,
    /// How long an allocation waits for a free connection
    pub connection_wait_time_ms: u64,

    /// Handles in one transaction may share a physical connection
    pub shareable: bool,
    /// Single-participant transactions use the driver's local transaction
    pub local_transaction_optimization: bool,
    /// Use the driver's XA interface
    pub xa_enabled: bool,
    /// Use the driver's local-transaction interface
    pub local_transactions_enabled: bool,
    /// Capture a backtrace at every allocation
    pub save_allocation_trace: bool,
    /// Close handles left open when a scope is aborted
    pub close_dangling_connections: bool,
    /// Re-point handles checked out before `begin` onto enlisted connections
    pub share_cached_handles: bool,
}

impl PoolConfig {
    /// Default options for a pool called `name`
    pub fn new(name: impl Into<String>) -> Self {
        PoolConfig {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the connection limit
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the overflow limit
    pub fn max_overflow_connections(mut self, max: usize) -> Self {
        self.max_overflow_connections = max;
        self
    }

    /// Set the idle ring capacity
    pub fn max_idle_count(mut self, max: usize) -> Self {
        self.max_idle_count = max;
        self
    }

    /// Set the idle lifetime
    pub fn max_idle_time(mut self, time: Duration) -> Self {
        self.max_idle_time_ms = time.as_millis() as u64;
        self
    }

    /// Set the active lifetime
    pub fn max_active_time(mut self, time: Duration) -> Self {
        self.max_active_time_ms = time.as_millis() as u64;
        self
    }

    /// Set the total lifetime
    pub fn max_pool_time(mut self, time: Duration) -> Self {
        self.max_pool_time_ms = time.as_millis() as u64;
        self
    }

    /// Set the allocation wait time
    pub fn connection_wait_time(mut self, time: Duration) -> Self {
        self.connection_wait_time_ms = time.as_millis() as u64;
        self
    }

    /// Enable or disable sharing
    pub fn shareable(mut self, shareable: bool) -> Self {
        self.shareable = shareable;
        self
    }

    /// Enable or disable the local-transaction optimization
    pub fn local_transaction_optimization(mut self, enable: bool) -> Self {
        self.local_transaction_optimization = enable;
        self
    }

    /// Enable or disable allocation backtraces
    pub fn save_allocation_trace(mut self, enable: bool) -> Self {
        self.save_allocation_trace = enable;
        self
    }

    /// Enable or disable re-pointing of cached handles at begin
    pub fn share_cached_handles(mut self, enable: bool) -> Self {
        self.share_cached_handles = enable;
        self
    }

    /// Idle lifetime, `None` when unbounded
    pub fn max_idle_time_bound(&self) -> Option<Duration> {
        millis(self.max_idle_time_ms)
    }

    /// Active lifetime, `None` when unbounded
    pub fn max_active_time_bound(&self) -> Option<Duration> {
        millis(self.max_active_time_ms)
    }

    /// Total lifetime, `None` when unbounded
    pub fn max_pool_time_bound(&self) -> Option<Duration> {
        millis(self.max_pool_time_ms)
    }

    /// Allocation wait time
    pub fn connection_wait_time_bound(&self) -> Duration {
        Duration::from_millis(self.connection_wait_time_ms)
    }

    /// Check the options for consistency
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config(format!(
                "pool '{}': max_connections must be at least 1",
                self.name
            )));
        }
        if self.max_create_connections == 0 {
            return Err(Error::Config(format!(
                "pool '{}': max_create_connections must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            name: "default".to_string(),
            max_connections: 1024,
            max_overflow_connections: 1024,
            max_create_connections: 5,
            max_idle_count: 1024,
            max_idle_time_ms: 30_000,
            max_active_time_ms: 6 * 3600 * 1000,
            max_pool_time_ms: 24 * 3600 * 1000,
            connection_wait_time_ms: 30_000,
            shareable: true,
            local_transaction_optimization: true,
            xa_enabled: true,
            local_transactions_enabled: true,
            save_allocation_trace: false,
            close_dangling_connections: true,
            share_cached_handles: false,
        }
    }
}
