//! Transaction environment: one manager, named pools, optional reapers
//!
//! ```ignore
//! use xapool::prelude::*;
//!
//! let env = TransactionEnvironment::builder()
//!     .pool(PoolConfig::new("orders"), orders_factory)
//!     .pool(PoolConfig::new("inventory"), inventory_factory)
//!     .build()?;
//! env.start()?;
//!
//! let scope = env.new_scope();
//! scope.begin()?;
//! let orders = env.allocate("orders", &scope)?;
//! let inventory = env.allocate("inventory", &scope)?;
//! // ... use orders.connection()? and inventory.connection()? ...
//! orders.close();
//! inventory.close();
//! scope.commit()?;
//! ```

use crate::config::XapoolConfig;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use xapool_coordinator::{RecoveryReport, TransactionConfig, TransactionManager};
use xapool_core::{
    ConnectionRequest, Credential, Error, ManagedConnectionFactory, Result, XaLog,
};
use xapool_durability::FileXaLog;
use xapool_pool::{ConnectionPool, PoolConfig, PoolReaper, ResourceHandle, TransactionScope};

/// What [`TransactionEnvironment::start`] did
#[derive(Debug, Default)]
pub struct StartReport {
    /// Recovery outcome per pool, for pools that could scan their resource
    /// manager
    pub recovered: Vec<(String, RecoveryReport)>,
    /// In-doubt log entries closed after every pool was scanned
    pub completed: usize,
}

/// A transaction manager and its connection pools
pub struct TransactionEnvironment {
    config: XapoolConfig,
    manager: Arc<TransactionManager>,
    pools: BTreeMap<String, Arc<ConnectionPool>>,
    reap: bool,
    reapers: Mutex<Vec<PoolReaper>>,
}

impl TransactionEnvironment {
    /// Builder with default options
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new()
    }

    /// Effective configuration
    pub fn config(&self) -> &XapoolConfig {
        &self.config
    }

    /// Shared transaction manager
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Pool called `name`
    pub fn pool(&self, name: &str) -> Option<&Arc<ConnectionPool>> {
        self.pools.get(name)
    }

    /// Pool names in order
    pub fn pool_names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// Fresh scope with no transaction
    pub fn new_scope(&self) -> Arc<TransactionScope> {
        TransactionScope::new(Arc::clone(&self.manager))
    }

    /// Check out an anonymous connection from pool `name` within `scope`
    pub fn allocate(&self, name: &str, scope: &Arc<TransactionScope>) -> Result<Arc<ResourceHandle>> {
        self.allocate_as(name, scope, &Credential::anonymous(), &ConnectionRequest::new())
    }

    /// Check out a connection from pool `name` within `scope`
    pub fn allocate_as(
        &self,
        name: &str,
        scope: &Arc<TransactionScope>,
        credential: &Credential,
        request: &ConnectionRequest,
    ) -> Result<Arc<ResourceHandle>> {
        let pool = self
            .pools
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown pool '{}'", name)))?;
        pool.allocate(Some(scope), credential, request)
    }

    /// Start every pool, recover in-doubt branches, then close the log's
    /// remaining in-doubt entries
    ///
    /// Reapers are spawned here when enabled.
    pub fn start(&self) -> Result<StartReport> {
        let mut report = StartReport::default();
        for (name, pool) in &self.pools {
            if let Some(recovered) = pool.start() {
                if !recovered.is_clean() {
                    warn!(pool = %name, failed = recovered.failed.len(), "recovery incomplete");
                }
                report.recovered.push((name.clone(), recovered));
            }
        }
        report.completed = self.manager.complete_recovery()?;

        if self.reap {
            let mut reapers = self.reapers.lock();
            if reapers.is_empty() {
                for pool in self.pools.values() {
                    reapers.push(PoolReaper::spawn(pool)?);
                }
            }
        }

        info!(
            pools = self.pools.len(),
            recovered = report.recovered.len(),
            completed = report.completed,
            "transaction environment started"
        );
        Ok(report)
    }

    /// Stop reapers and close every pool
    pub fn close(&self) {
        let reapers = std::mem::take(&mut *self.reapers.lock());
        drop(reapers);
        for pool in self.pools.values() {
            pool.close();
        }
        info!("transaction environment closed");
    }
}

impl std::fmt::Debug for TransactionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEnvironment")
            .field("server_id", &self.manager.server_id())
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for a [`TransactionEnvironment`]
pub struct EnvironmentBuilder {
    config: XapoolConfig,
    log: Option<Arc<dyn XaLog>>,
    factories: BTreeMap<String, Arc<dyn ManagedConnectionFactory>>,
    reap: bool,
}

impl EnvironmentBuilder {
    /// Default options, no pools
    pub fn new() -> Self {
        EnvironmentBuilder {
            config: XapoolConfig::default(),
            log: None,
            factories: BTreeMap::new(),
            reap: false,
        }
    }

    /// Use a loaded configuration; pools it declares still need
    /// [`factory`](Self::factory)
    pub fn config(mut self, config: XapoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the transaction manager options
    pub fn transaction(mut self, transaction: TransactionConfig) -> Self {
        self.config.transaction = transaction;
        self
    }

    /// Use `log` for commit decisions instead of the configured log path
    pub fn log(mut self, log: Arc<dyn XaLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Declare a pool and its factory
    pub fn pool(mut self, pool: PoolConfig, factory: Arc<dyn ManagedConnectionFactory>) -> Self {
        self.factories.insert(pool.name.clone(), factory);
        self.config = self.config.with_pool(pool);
        self
    }

    /// Supply the factory for a pool declared in the configuration
    pub fn factory(mut self, name: impl Into<String>, factory: Arc<dyn ManagedConnectionFactory>) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Spawn a reaper per pool at start
    pub fn reaper(mut self, enable: bool) -> Self {
        self.reap = enable;
        self
    }

    /// Validate, open the log and create the pools
    pub fn build(mut self) -> Result<TransactionEnvironment> {
        self.config.validate()?;

        let log = match (self.log.take(), &self.config.transaction.log_path) {
            (Some(log), _) => Some(log),
            (None, Some(path)) => Some(Arc::new(FileXaLog::open(path)?) as Arc<dyn XaLog>),
            (None, None) => None,
        };
        let mut manager = TransactionManager::new(&self.config.transaction);
        if let Some(log) = log {
            manager = manager.with_log(log);
        }
        let manager = Arc::new(manager);

        let mut pools = BTreeMap::new();
        for pool_config in &self.config.pools {
            let factory = self.factories.remove(&pool_config.name).ok_or_else(|| {
                Error::Config(format!("no connection factory for pool '{}'", pool_config.name))
            })?;
            let pool = ConnectionPool::new(pool_config.clone(), factory, Arc::clone(&manager))?;
            pools.insert(pool_config.name.clone(), pool);
        }
        if let Some(name) = self.factories.keys().next() {
            return Err(Error::Config(format!("factory supplied for undeclared pool '{}'", name)));
        }

        Ok(TransactionEnvironment {
            config: self.config,
            manager,
            pools,
            reap: self.reap,
            reapers: Mutex::new(Vec::new()),
        })
    }
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
