//! Shared fixtures for the integration suites

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use xapool::{PoolConfig, TransactionConfig, TransactionEnvironment};
use xapool_core::XaLog;
use xapool_testkit::{MockFactory, MockXaResource};

pub use xapool::{ResourceHandle, TransactionScope};
pub use xapool_core::{Credential, Error, TransactionStatus, XaErrorCode};

/// An environment plus the mock factory behind each of its pools
pub struct Site {
    pub env: TransactionEnvironment,
    pub factories: BTreeMap<String, Arc<MockFactory>>,
}

impl Site {
    /// Factory of pool `name`
    pub fn factory(&self, name: &str) -> &Arc<MockFactory> {
        &self.factories[name]
    }

    /// XA resource of the `id`th physical connection of pool `name`
    pub fn xa(&self, name: &str, id: u64) -> Arc<MockXaResource> {
        let conn = self
            .factory(name)
            .connection(id)
            .unwrap_or_else(|| panic!("pool {} has no connection {}", name, id));
        Arc::clone(conn.xa().expect("mock connection without XA"))
    }

    /// Allocate an anonymous connection from `name` inside `scope`
    pub fn allocate(&self, name: &str, scope: &Arc<TransactionScope>) -> Arc<ResourceHandle> {
        self.env.allocate(name, scope).unwrap()
    }
}

/// Builder for a [`Site`]
pub struct SiteBuilder {
    pools: Vec<PoolConfig>,
    transaction: TransactionConfig,
    log: Option<Arc<dyn XaLog>>,
}

impl SiteBuilder {
    pub fn new() -> Self {
        xapool_testkit::init_tracing();
        SiteBuilder {
            pools: Vec::new(),
            transaction: TransactionConfig::default(),
            log: None,
        }
    }

    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pools.push(config);
        self
    }

    /// Pool with the local-transaction shortcut turned off, so every
    /// connection goes through XA
    pub fn xa_pool(self, name: &str) -> Self {
        self.pool(PoolConfig::new(name).local_transaction_optimization(false))
    }

    pub fn transaction(mut self, config: TransactionConfig) -> Self {
        self.transaction = config;
        self
    }

    pub fn log(mut self, log: Arc<dyn XaLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> Site {
        let mut factories = BTreeMap::new();
        let mut builder = TransactionEnvironment::builder().transaction(self.transaction);
        if let Some(log) = self.log {
            builder = builder.log(log);
        }
        for config in self.pools {
            let factory = Arc::new(MockFactory::new(config.name.clone()));
            factories.insert(config.name.clone(), Arc::clone(&factory));
            builder = builder.pool(config, factory);
        }
        Site {
            env: builder.build().unwrap(),
            factories,
        }
    }
}

/// Three XA pools, each its own resource manager
pub fn three_pools() -> Site {
    SiteBuilder::new()
        .xa_pool("orders")
        .xa_pool("inventory")
        .xa_pool("billing")
        .build()
}
